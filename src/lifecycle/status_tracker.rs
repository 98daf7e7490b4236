use crate::duration::{format_detailed_duration, format_duration};
use crate::lifecycle::listener::{ChainEvent, LifecycleListener, TaskEvent};
use crate::status::Status;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Priority of the [`StatusTracker`]; it sees events before other listeners.
pub const STATUS_TRACKER_PRIORITY: i32 = 1000;

/// Outcome of one task as recorded by the [`StatusTracker`].
#[derive(Serialize, Clone, Debug)]
pub struct TaskRecord {
    pub index: usize,
    pub task: String,
    pub duration: Duration,
    pub status: Status,
}

/// Per-task records of one chain run. Stored in the context scope when the
/// chain finishes, so it outlives the tracker's own bookkeeping.
#[derive(Serialize, Clone, Debug)]
pub struct ChainSummary {
    pub chain: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub tasks: Vec<TaskRecord>,
}

enum Timing {
    Running(Instant),
    Finished(Duration),
}

impl Timing {
    fn finish(&mut self) -> Duration {
        let elapsed = match self {
            Timing::Running(started) => started.elapsed(),
            Timing::Finished(elapsed) => *elapsed,
        };
        *self = Timing::Finished(elapsed);
        elapsed
    }

    fn duration(&self) -> Duration {
        match self {
            Timing::Running(started) => started.elapsed(),
            Timing::Finished(elapsed) => *elapsed,
        }
    }
}

/// Records durations and statuses of tasks and chains.
#[derive(Default)]
pub struct StatusTracker {
    chains: DashMap<Uuid, (DateTime<Utc>, Timing)>,
    tasks: DashMap<(Uuid, usize), (String, Timing)>,
    statuses: DashMap<(Uuid, usize), Status>,
}

impl StatusTracker {
    /// Chain duration, running or finished. Zero if unknown.
    pub fn chain_duration(&self, context_id: Uuid) -> Duration {
        self.chains
            .get(&context_id)
            .map(|entry| entry.1.duration())
            .unwrap_or_default()
    }

    pub fn task_duration(&self, context_id: Uuid, index: usize) -> Duration {
        self.tasks
            .get(&(context_id, index))
            .map(|entry| entry.1.duration())
            .unwrap_or_default()
    }

    pub fn task_status(&self, context_id: Uuid, index: usize) -> Option<Status> {
        self.statuses
            .get(&(context_id, index))
            .map(|status| status.clone())
    }

    /// Finished tasks of a context in execution order.
    pub fn task_records(&self, context_id: Uuid) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self
            .statuses
            .iter()
            .filter(|entry| entry.key().0 == context_id)
            .map(|entry| {
                let index = entry.key().1;
                TaskRecord {
                    index,
                    task: self
                        .tasks
                        .get(&(context_id, index))
                        .map(|task| task.0.clone())
                        .unwrap_or_default(),
                    duration: self.task_duration(context_id, index),
                    status: entry.value().clone(),
                }
            })
            .collect();
        records.sort_by_key(|record| record.index);
        records
    }
}

impl LifecycleListener for StatusTracker {
    fn begin_task_chain(&self, event: &ChainEvent<'_>) {
        self.chains.insert(
            event.context_id,
            (Utc::now(), Timing::Running(Instant::now())),
        );
    }

    fn begin_task(&self, event: &TaskEvent<'_>) {
        self.tasks.insert(
            (event.context_id, event.index),
            (event.task.to_string(), Timing::Running(Instant::now())),
        );
    }

    fn finish_task(&self, event: &TaskEvent<'_>) {
        let key = (event.context_id, event.index);
        let Some(mut entry) = self.tasks.get_mut(&key) else {
            warn!(task = event.task, "No start time recorded for task");
            return;
        };
        let elapsed = entry.1.finish();
        drop(entry);

        debug!(
            task = event.task,
            "Task finished after {}",
            format_detailed_duration(elapsed)
        );
        if let Some(status) = event.status {
            self.statuses.insert(key, status.clone());
        }
    }

    fn finish_task_chain(&self, event: &ChainEvent<'_>) {
        let Some(mut timing) = self.chains.get_mut(&event.context_id) else {
            warn!(chain = event.chain, "No start time recorded for chain");
            return;
        };
        let started_at = timing.0;
        let elapsed = timing.1.finish();
        drop(timing);

        info!(
            chain = event.chain,
            severity = %event.status.severity(),
            "Chain finished in {}",
            format_duration(elapsed)
        );

        event.scope.set(ChainSummary {
            chain: event.chain.to_string(),
            started_at,
            duration: elapsed,
            tasks: self.task_records(event.context_id),
        });
    }

    fn dispose_context(&self, event: &ChainEvent<'_>) {
        self.chains.remove(&event.context_id);
        self.tasks.retain(|key, _| key.0 != event.context_id);
        self.statuses.retain(|key, _| key.0 != event.context_id);
    }
}
