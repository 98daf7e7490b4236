//! Off-sequence execution of tasks on a bounded pool, and the barriers that
//! join them back into the sequence.

use crate::error::{TaskingError, is_cancellation};
use crate::status::Status;
use crate::task::types::{Task, TaskContext};
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Fallback pool size when the available parallelism cannot be determined.
pub const FALLBACK_POOL_SIZE: usize = 4;

/// Outcome of a background run; shared between all barriers awaiting it.
pub type BackgroundResult = Result<Option<Status>, Arc<anyhow::Error>>;

/// Handle to submitted background work.
pub type BackgroundHandle = Shared<BoxFuture<'static, BackgroundResult>>;

/// Fixed-size pool for background work.
///
/// Created once per engine and stored in the engine scope so that background
/// wrappers in any context can submit to it.
#[derive(Debug)]
pub struct BackgroundExecutor {
    permits: Arc<Semaphore>,
    size: usize,
}

impl BackgroundExecutor {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Pool sized to the available hardware parallelism.
    pub fn with_available_parallelism() -> Self {
        let size = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(FALLBACK_POOL_SIZE);
        Self::new(size)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of idle workers.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Submits work without waiting for it. The work starts as soon as a
    /// worker is free; the returned handle resolves with its outcome.
    pub fn submit<F>(&self, name: &str, work: F) -> BackgroundHandle
    where
        F: Future<Output = BackgroundResult> + Send + 'static,
    {
        let permits = self.permits.clone();
        let task = name.to_string();
        let join = tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.map_err(|_| {
                Arc::new(anyhow::Error::new(TaskingError::Background {
                    task: task.clone(),
                    message: "background pool closed".to_string(),
                }))
            })?;
            debug!(task = %task, "Background task started");
            work.await
        });

        let name = name.to_string();
        async move {
            match join.await {
                Ok(result) => result,
                Err(e) => Err(Arc::new(anyhow::Error::new(TaskingError::Background {
                    task: name,
                    message: e.to_string(),
                }))),
            }
        }
        .boxed()
        .shared()
    }
}

impl Default for BackgroundExecutor {
    fn default() -> Self {
        Self::with_available_parallelism()
    }
}

/// Wraps a task so that running it only submits it to the
/// [`BackgroundExecutor`]. The wrapper finishes as soon as submission
/// succeeded; a [`Barrier`] waits for the actual work.
pub struct BackgroundTask {
    task: Arc<dyn Task>,
    pending: Mutex<Option<BackgroundHandle>>,
}

impl BackgroundTask {
    pub fn new(task: Arc<dyn Task>) -> Arc<Self> {
        Arc::new(Self {
            task,
            pending: Mutex::new(None),
        })
    }

    pub fn wrap(task: impl Task + 'static) -> Arc<Self> {
        Self::new(Arc::new(task))
    }

    pub fn inner(&self) -> &Arc<dyn Task> {
        &self.task
    }

    /// Whether the work was submitted at least once.
    pub fn is_started(&self) -> bool {
        self.pending().is_some()
    }

    /// A task that blocks the sequence until this background task is done.
    pub fn barrier(self: &Arc<Self>) -> Arc<Barrier> {
        Arc::new(Barrier {
            name: format!("Wait for: {}", self.name()),
            awaited: vec![self.clone()],
        })
    }

    /// One barrier over all given background tasks, or `None` if there are none.
    pub fn all_barrier(tasks: &[Arc<BackgroundTask>]) -> Option<Arc<Barrier>> {
        if tasks.is_empty() {
            return None;
        }
        Some(Arc::new(Barrier {
            name: "Await unfinished background tasks.".to_string(),
            awaited: tasks.to_vec(),
        }))
    }

    fn pending(&self) -> Option<BackgroundHandle> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Waits for submitted work, if any, and discards its outcome.
    pub async fn settle(&self) {
        if let Err(e) = self.wait().await {
            debug!(task = %self.name(), "Unjoined background task failed: {:#}", e);
        }
    }

    async fn wait(&self) -> BackgroundResult {
        match self.pending() {
            Some(handle) => handle.await,
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Task for BackgroundTask {
    fn name(&self) -> String {
        format!("{} (parallel)", self.task.name())
    }

    async fn execute(&self, ctx: &TaskContext) -> anyhow::Result<Option<Status>> {
        let executor = ctx.resolve::<BackgroundExecutor>()?;
        let task = self.task.clone();
        let name = task.name();
        let background_ctx = ctx.derive(&name);

        let handle = executor.submit(&name, async move {
            match task.execute(&background_ctx).await {
                Ok(Some(status)) => Ok(Some(status)),
                Ok(None) => Ok(background_ctx.published_status()),
                Err(e) => Err(Arc::new(e)),
            }
        });

        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(None)
    }
}

/// Synthetic task joining one or more background tasks.
pub struct Barrier {
    name: String,
    awaited: Vec<Arc<BackgroundTask>>,
}

impl Barrier {
    /// Whether this barrier joins the given background task.
    pub fn awaits(&self, task: &Arc<BackgroundTask>) -> bool {
        self.awaited.iter().any(|awaited| Arc::ptr_eq(awaited, task))
    }

    pub fn awaited(&self) -> &[Arc<BackgroundTask>] {
        &self.awaited
    }
}

#[async_trait]
impl Task for Barrier {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn execute(&self, _ctx: &TaskContext) -> anyhow::Result<Option<Status>> {
        let mut statuses = Vec::new();
        for task in &self.awaited {
            match task.wait().await {
                Ok(Some(status)) => statuses.push(status),
                Ok(None) => {}
                Err(e) if is_cancellation(&e) => return Err(TaskingError::Cancelled.into()),
                Err(e) => {
                    warn!(task = %task.name(), "Background task failed: {:#}", e);
                    return Err(TaskingError::Background {
                        task: task.name(),
                        message: format!("{:#}", e),
                    }
                    .into());
                }
            }
        }

        Ok(match statuses.len() {
            0 => None,
            1 => statuses.pop(),
            _ => {
                let mut combined = Status::multi(self.name.clone());
                for status in statuses {
                    combined.add(status);
                }
                Some(combined)
            }
        })
    }
}
