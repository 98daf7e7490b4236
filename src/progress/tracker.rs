use crate::error::TaskingError;
use crate::progress::monitor::SubMonitor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Handle given to a task for reporting progress and polling cancellation.
pub trait ProgressTracker: Send + Sync {
    /// Report work done. Never exceeds the task's declared work amount;
    /// excess is ignored.
    fn worked(&self, amount: u32);

    fn is_canceled(&self) -> bool;

    /// Changes the name displayed for the running task.
    fn set_task_name(&self, name: &str);

    /// Returns the cancellation signal if cancellation was requested.
    fn check_canceled(&self) -> Result<(), TaskingError> {
        if self.is_canceled() {
            Err(TaskingError::Cancelled)
        } else {
            Ok(())
        }
    }
}

pub type ProgressListener = Arc<dyn Fn(u64) + Send + Sync>;

/// Tracker backed by a monitor slice. Notifies listeners with the cumulative
/// amount of accepted work.
pub struct TaskProgressTracker {
    task: String,
    monitor: SubMonitor,
    current: AtomicU64,
    next_listener: AtomicU64,
    listeners: Mutex<Vec<(u64, ProgressListener)>>,
}

impl TaskProgressTracker {
    pub fn new(task: impl Into<String>, monitor: SubMonitor) -> Self {
        Self {
            task: task.into(),
            monitor,
            current: AtomicU64::new(0),
            next_listener: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Registers a listener and returns the id used to remove it again.
    pub fn add_listener(&self, listener: ProgressListener) -> u64 {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: u64) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(listener_id, _)| *listener_id != id);
    }

    fn notify_listeners(&self, value: u64) {
        let listeners: Vec<ProgressListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(value);
        }
    }
}

impl ProgressTracker for TaskProgressTracker {
    fn worked(&self, amount: u32) {
        let accepted = self.monitor.worked(u64::from(amount));
        if accepted == 0 {
            return;
        }
        let value = self.current.fetch_add(accepted, Ordering::SeqCst) + accepted;
        self.notify_listeners(value);
    }

    fn is_canceled(&self) -> bool {
        self.monitor.is_canceled()
    }

    fn set_task_name(&self, name: &str) {
        self.monitor.set_task_name(name);
    }
}

/// Tracker whose work reports are ignored, used when an estimation service
/// drives the progress of a task. Naming and cancellation still pass through.
pub struct RestrictedTracker {
    delegate: Arc<dyn ProgressTracker>,
}

impl RestrictedTracker {
    pub fn new(delegate: Arc<dyn ProgressTracker>) -> Self {
        Self { delegate }
    }
}

impl ProgressTracker for RestrictedTracker {
    fn worked(&self, _amount: u32) {}

    fn is_canceled(&self) -> bool {
        self.delegate.is_canceled()
    }

    fn set_task_name(&self, name: &str) {
        self.delegate.set_task_name(name);
    }
}
