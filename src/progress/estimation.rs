//! Progress estimation from remembered task durations.

use crate::error::{Result, TaskingError};
use crate::progress::tracker::ProgressTracker;
use crate::status::Status;
use crate::task::Task;
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default length of one estimation tick.
pub const DEFAULT_RESOLUTION_MS: u64 = 100;

static ID_SANITIZER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^A-Za-z0-9_.]+").expect("static pattern is valid")
});

/// Supplies remembered work amounts for tasks and learns new ones.
pub trait ProgressEstimationService: Send + Sync {
    /// Estimation id for a task, or `None` if the task is not estimated.
    /// Must return the same id for the same task every time.
    fn calculate_id(&self, task: &dyn Task) -> Option<String>;

    /// Remembered work amount in ticks, never below 1.
    fn estimated_ticks(&self, id: &str) -> u32;

    fn estimated_duration(&self, id: &str) -> Duration;

    /// The task identified by `id` starts; `tracker` is its unrestricted tracker.
    fn begin(&self, id: &str, tracker: Arc<dyn ProgressTracker>);

    /// The task finished with `status`. Only non-error outcomes are learned.
    fn finish(&self, id: &str, status: &Status);
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct EstimationStore {
    resolution_ms: u64,
    estimates: BTreeMap<String, u32>,
}

struct RunningEstimate {
    started: Instant,
    ticker: Option<JoinHandle<()>>,
}

/// Estimation service that remembers how long tasks took.
///
/// While a task runs, a ticker reports one unit of work per tick until the
/// remembered estimate is used up.
pub struct DurationEstimator {
    resolution: Duration,
    estimates: DashMap<String, u32>,
    running: DashMap<String, RunningEstimate>,
    store_path: Option<PathBuf>,
}

impl DurationEstimator {
    pub fn new(resolution: Duration) -> Self {
        Self {
            resolution: resolution.max(Duration::from_millis(1)),
            estimates: DashMap::new(),
            running: DashMap::new(),
            store_path: None,
        }
    }

    /// Loads estimates from `path` if it exists and saves back to it after
    /// every learned estimate.
    pub fn with_store(resolution: Duration, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut estimator = Self::new(resolution);
        if path.exists() {
            let content =
                std::fs::read_to_string(&path).map_err(|e| TaskingError::io(&path, e))?;
            let store: EstimationStore = serde_json::from_str(&content)?;
            if store.resolution_ms != estimator.resolution.as_millis() as u64 {
                warn!(
                    path = %path.display(),
                    stored = store.resolution_ms,
                    "Estimation store uses a different resolution, discarding it"
                );
            } else {
                for (id, ticks) in store.estimates {
                    estimator.estimates.insert(id, ticks);
                }
            }
        }
        estimator.store_path = Some(path);
        Ok(estimator)
    }

    pub fn resolution(&self) -> Duration {
        self.resolution
    }

    /// Stores an estimate directly, e.g. to seed the service.
    pub fn set_estimate(&self, id: impl Into<String>, ticks: u32) {
        self.estimates.insert(id.into(), ticks);
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let store = EstimationStore {
            resolution_ms: self.resolution.as_millis() as u64,
            estimates: self
                .estimates
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
        };
        let content = serde_json::to_string_pretty(&store)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TaskingError::io(parent, e))?;
        }
        let temp = path.with_extension("json.tmp");
        std::fs::write(&temp, content).map_err(|e| TaskingError::io(&temp, e))?;
        std::fs::rename(&temp, path).map_err(|e| TaskingError::io(path, e))?;
        Ok(())
    }

    fn update_estimation(&self, id: &str, runtime: Duration) {
        let current = self.estimated_ticks(id);
        let measured = (runtime.as_millis() / self.resolution.as_millis().max(1)) as u32;

        let estimate = if measured / 2 > current || current / 2 > measured {
            // deviation of more than 50%: trust the new measurement
            measured
        } else {
            ((u64::from(measured) + u64::from(current)) / 2) as u32
        };

        debug!(id, current, measured, estimate, "Updating progress estimation");
        self.estimates.insert(id.to_string(), estimate);

        if let Some(path) = &self.store_path
            && let Err(e) = self.save(path)
        {
            warn!("Cannot save task runtime estimation: {}", e);
        }
    }
}

impl Default for DurationEstimator {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_RESOLUTION_MS))
    }
}

impl ProgressEstimationService for DurationEstimator {
    fn calculate_id(&self, task: &dyn Task) -> Option<String> {
        if task.declares_work_amount() {
            return None;
        }
        Some(ID_SANITIZER.replace_all(&task.name(), "_").into_owned())
    }

    fn estimated_ticks(&self, id: &str) -> u32 {
        self.estimates
            .get(id)
            .map(|ticks| *ticks)
            .unwrap_or(1)
            .max(1)
    }

    fn estimated_duration(&self, id: &str) -> Duration {
        self.resolution * self.estimated_ticks(id)
    }

    fn begin(&self, id: &str, tracker: Arc<dyn ProgressTracker>) {
        let ticks = self.estimated_ticks(id);
        let resolution = self.resolution;

        let ticker = tokio::runtime::Handle::try_current().ok().map(|handle| {
            handle.spawn(async move {
                let mut interval = tokio::time::interval(resolution);
                interval.tick().await;
                for _ in 0..ticks {
                    interval.tick().await;
                    tracker.worked(1);
                }
                // estimate exceeded, nothing more to report
            })
        });

        if let Some(previous) = self.running.insert(
            id.to_string(),
            RunningEstimate {
                started: Instant::now(),
                ticker,
            },
        ) && let Some(ticker) = previous.ticker
        {
            ticker.abort();
        }
    }

    fn finish(&self, id: &str, status: &Status) {
        let Some((_, running)) = self.running.remove(id) else {
            debug!(id, "Finish without begin, ignoring");
            return;
        };
        if let Some(ticker) = running.ticker {
            ticker.abort();
        }

        if !status.is_halting() {
            self.update_estimation(id, running.started.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskContext;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct NamedTask(&'static str, bool);

    #[async_trait]
    impl Task for NamedTask {
        fn name(&self) -> String {
            self.0.to_string()
        }

        async fn execute(&self, _ctx: &TaskContext) -> anyhow::Result<Option<Status>> {
            Ok(None)
        }

        fn declares_work_amount(&self) -> bool {
            self.1
        }
    }

    #[test]
    fn test_calculate_id_is_stable_and_sanitized() {
        let estimator = DurationEstimator::default();
        let task = NamedTask("Compile: core (debug)", false);

        let first = estimator.calculate_id(&task);
        let second = estimator.calculate_id(&task);
        assert_eq!(first, second);
        assert_eq!(first.as_deref(), Some("Compile_core_debug_"));
    }

    #[test]
    fn test_tasks_with_explicit_work_are_not_estimated() {
        let estimator = DurationEstimator::default();
        assert!(estimator.calculate_id(&NamedTask("explicit", true)).is_none());
    }

    #[test]
    fn test_estimates_never_below_one() {
        let estimator = DurationEstimator::default();
        assert_eq!(estimator.estimated_ticks("unknown"), 1);
        estimator.set_estimate("zero", 0);
        assert_eq!(estimator.estimated_ticks("zero"), 1);
        assert_eq!(
            estimator.estimated_duration("unknown"),
            Duration::from_millis(DEFAULT_RESOLUTION_MS)
        );
    }

    #[test]
    fn test_update_rule() {
        let estimator = DurationEstimator::new(Duration::from_millis(10));

        // within 50%: averaged
        estimator.set_estimate("steady", 10);
        estimator.update_estimation("steady", Duration::from_millis(140));
        assert_eq!(estimator.estimated_ticks("steady"), 12);

        // much longer: replaced
        estimator.set_estimate("slower", 10);
        estimator.update_estimation("slower", Duration::from_millis(500));
        assert_eq!(estimator.estimated_ticks("slower"), 50);

        // much shorter: replaced
        estimator.set_estimate("faster", 40);
        estimator.update_estimation("faster", Duration::from_millis(100));
        assert_eq!(estimator.estimated_ticks("faster"), 10);
    }

    #[tokio::test]
    async fn test_failed_runs_are_not_learned() {
        let estimator = DurationEstimator::new(Duration::from_millis(10));
        estimator.set_estimate("task", 7);

        let monitor = crate::progress::ProgressMonitor::new("chain");
        monitor.begin("chain", 7);
        let tracker = Arc::new(crate::progress::TaskProgressTracker::new(
            "task",
            monitor.split(7),
        ));

        estimator.begin("task", tracker);
        estimator.finish("task", &Status::error("failed"));
        assert_eq!(estimator.estimated_ticks("task"), 7);
    }

    #[tokio::test]
    async fn test_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("estimates.json");

        let estimator = DurationEstimator::with_store(Duration::from_millis(10), &path).unwrap();
        estimator.set_estimate("compile", 3);
        estimator.update_estimation("compile", Duration::from_millis(40));
        assert!(path.exists());

        let reloaded = DurationEstimator::with_store(Duration::from_millis(10), &path).unwrap();
        assert_eq!(reloaded.estimated_ticks("compile"), 3);

        let other_resolution =
            DurationEstimator::with_store(Duration::from_millis(100), &path).unwrap();
        assert_eq!(other_resolution.estimated_ticks("compile"), 1);
    }
}
