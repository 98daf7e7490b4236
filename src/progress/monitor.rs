//! Root progress allocation and its per-task slices.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

struct MonitorState {
    name: Mutex<String>,
    current_task: Mutex<String>,
    total: AtomicU64,
    allocated: AtomicU64,
    worked: AtomicU64,
    canceled: Arc<AtomicBool>,
}

/// Root of a progress tree.
///
/// The total is the sum of all per-task work amounts. Every task receives a
/// slice ([`SubMonitor`]) of that total. Cancellation is a single flag shared
/// by the root, all slices and all nested monitors.
#[derive(Clone)]
pub struct ProgressMonitor {
    state: Arc<MonitorState>,
}

impl ProgressMonitor {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_cancel_flag(name, Arc::new(AtomicBool::new(false)))
    }

    fn with_cancel_flag(name: impl Into<String>, canceled: Arc<AtomicBool>) -> Self {
        Self {
            state: Arc::new(MonitorState {
                name: Mutex::new(name.into()),
                current_task: Mutex::new(String::new()),
                total: AtomicU64::new(0),
                allocated: AtomicU64::new(0),
                worked: AtomicU64::new(0),
                canceled,
            }),
        }
    }

    /// A fresh monitor sharing this monitor's cancellation flag.
    pub fn nested(&self, name: impl Into<String>) -> ProgressMonitor {
        Self::with_cancel_flag(name, self.state.canceled.clone())
    }

    /// Starts a new round of work, discarding previous accounting.
    pub fn begin(&self, name: &str, total: u64) {
        *lock(&self.state.name) = name.to_string();
        self.state.total.store(total, Ordering::SeqCst);
        self.state.allocated.store(0, Ordering::SeqCst);
        self.state.worked.store(0, Ordering::SeqCst);
        debug!(monitor = name, total, "Progress started");
    }

    /// Allocates the next slice of the total for one task.
    pub fn split(&self, amount: u64) -> SubMonitor {
        self.state.allocated.fetch_add(amount, Ordering::SeqCst);
        SubMonitor {
            root: self.clone(),
            amount,
            remaining: Arc::new(AtomicU64::new(amount)),
        }
    }

    pub fn cancel(&self) {
        self.state.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.state.canceled.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> String {
        lock(&self.state.name).clone()
    }

    pub fn current_task(&self) -> String {
        lock(&self.state.current_task).clone()
    }

    pub fn total(&self) -> u64 {
        self.state.total.load(Ordering::SeqCst)
    }

    /// Sum of all slices handed out since [`ProgressMonitor::begin`].
    pub fn allocated(&self) -> u64 {
        self.state.allocated.load(Ordering::SeqCst)
    }

    pub fn worked(&self) -> u64 {
        self.state.worked.load(Ordering::SeqCst)
    }

    /// Completed fraction in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.worked() as f64 / total as f64).min(1.0)
    }

    fn set_current_task(&self, name: &str) {
        *lock(&self.state.current_task) = name.to_string();
    }
}

/// One task's share of a [`ProgressMonitor`].
#[derive(Clone)]
pub struct SubMonitor {
    root: ProgressMonitor,
    amount: u64,
    remaining: Arc<AtomicU64>,
}

impl SubMonitor {
    /// Reports work, clamped to what is left of this slice. Returns the
    /// amount actually accepted.
    pub fn worked(&self, amount: u64) -> u64 {
        let mut accepted = 0;
        let _ = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                accepted = amount.min(remaining);
                Some(remaining - accepted)
            });
        if accepted > 0 {
            self.root.state.worked.fetch_add(accepted, Ordering::SeqCst);
        }
        accepted
    }

    /// Marks the whole slice as consumed.
    pub fn done(&self) {
        self.worked(u64::MAX);
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::SeqCst)
    }

    pub fn is_canceled(&self) -> bool {
        self.root.is_canceled()
    }

    pub fn set_task_name(&self, name: &str) {
        self.root.set_current_task(name);
        debug!(task = name, "Progress task name changed");
    }

    pub fn root(&self) -> &ProgressMonitor {
        &self.root
    }

    /// A fresh root monitor for nested work that still honours this slice's
    /// cancellation flag.
    pub fn nested_monitor(&self, name: impl Into<String>) -> ProgressMonitor {
        self.root.nested(name)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slices_sum_to_total() {
        let monitor = ProgressMonitor::new("chain");
        let amounts = [3u64, 1, 6];
        monitor.begin("chain", amounts.iter().sum());

        let slices: Vec<_> = amounts.iter().map(|a| monitor.split(*a)).collect();
        assert_eq!(monitor.allocated(), monitor.total());
        assert_eq!(slices.iter().map(SubMonitor::amount).sum::<u64>(), 10);
    }

    #[test]
    fn test_worked_never_exceeds_slice() {
        let monitor = ProgressMonitor::new("chain");
        monitor.begin("chain", 5);
        let slice = monitor.split(5);

        assert_eq!(slice.worked(3), 3);
        assert_eq!(slice.worked(4), 2);
        assert_eq!(slice.worked(1), 0);
        assert_eq!(slice.remaining(), 0);
        assert_eq!(monitor.worked(), 5);
        assert!((monitor.fraction() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_done_consumes_remainder() {
        let monitor = ProgressMonitor::new("chain");
        monitor.begin("chain", 4);
        let first = monitor.split(2);
        first.worked(1);
        first.done();
        let second = monitor.split(2);
        second.done();
        assert_eq!(monitor.worked(), 4);
    }

    #[test]
    fn test_cancellation_is_shared() {
        let monitor = ProgressMonitor::new("chain");
        monitor.begin("chain", 2);
        let slice = monitor.split(2);
        let nested = slice.nested_monitor("lazy");

        assert!(!slice.is_canceled());
        nested.cancel();
        assert!(slice.is_canceled());
        assert!(monitor.is_canceled());
    }

    #[test]
    fn test_begin_resets_accounting() {
        let monitor = ProgressMonitor::new("chain");
        monitor.begin("chain", 2);
        monitor.split(2).done();
        monitor.begin("chain", 3);
        assert_eq!(monitor.worked(), 0);
        assert_eq!(monitor.allocated(), 0);
        assert_eq!(monitor.total(), 3);
    }
}
