use crate::error::TaskingError;
use crate::progress::{ProgressTracker, SubMonitor};
use crate::scope::Scope;
use crate::status::Status;
use crate::task::background::{BackgroundTask, Barrier};
use crate::task::lazy::LazyChainTask;
use crate::task::output::{OutputCapture, OutputStream, TaskOutput};
use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A single unit of work in a chain.
#[async_trait]
pub trait Task: Send + Sync {
    /// Display name, used for progress, logging and estimation ids
    fn name(&self) -> String;

    /// Entry operation. `Ok(None)` leaves the task's status untouched (ok,
    /// unless the task published one through [`TaskContext::publish_status`]).
    async fn execute(&self, ctx: &TaskContext) -> anyhow::Result<Option<Status>>;

    /// Whether [`Task::work_amount`] reports an explicit amount of work
    fn declares_work_amount(&self) -> bool {
        false
    }

    /// Amount of work this task will report. Called before any task of the
    /// chain runs, so it must not depend on earlier tasks.
    fn work_amount(&self, _scope: &Scope) -> anyhow::Result<u32> {
        Ok(1)
    }

    /// Standard output handling while the task runs
    fn output_capture(&self) -> Option<OutputCapture> {
        None
    }
}

/// A task type the context can create itself when it is prepared.
pub trait CreatableTask: Task + Sized + 'static {
    fn create(scope: &Scope) -> anyhow::Result<Self>;
}

type TaskConstructor = dyn Fn(&Scope) -> anyhow::Result<Arc<dyn Task>> + Send + Sync;

/// Deferred construction of a task, resolved against the chain scope when
/// execution starts.
#[derive(Clone)]
pub struct TaskFactory {
    name: String,
    create: Arc<TaskConstructor>,
}

impl TaskFactory {
    pub fn new<F>(name: impl Into<String>, create: F) -> Self
    where
        F: Fn(&Scope) -> anyhow::Result<Arc<dyn Task>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            create: Arc::new(create),
        }
    }

    pub fn of<T: CreatableTask>() -> Self {
        Self::new(std::any::type_name::<T>(), |scope| {
            Ok(Arc::new(T::create(scope)?) as Arc<dyn Task>)
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create(&self, scope: &Scope) -> Result<Arc<dyn Task>, TaskingError> {
        (self.create)(scope).map_err(|source| TaskingError::Instantiation {
            task: self.name.clone(),
            source,
        })
    }
}

/// An entry in a context's task list.
#[derive(Clone)]
pub enum TaskDescriptor {
    Instance(Arc<dyn Task>),
    Factory(TaskFactory),
    Background(Arc<BackgroundTask>),
    Barrier(Arc<Barrier>),
    LazyChain(Arc<LazyChainTask>),
}

impl TaskDescriptor {
    pub fn name(&self) -> String {
        match self {
            TaskDescriptor::Instance(task) => task.name(),
            TaskDescriptor::Factory(factory) => factory.name().to_string(),
            TaskDescriptor::Background(task) => task.name(),
            TaskDescriptor::Barrier(task) => task.name(),
            TaskDescriptor::LazyChain(task) => task.name(),
        }
    }

    /// Resolves this descriptor to a runnable task instance.
    pub fn instantiate(&self, scope: &Scope) -> Result<Arc<dyn Task>, TaskingError> {
        Ok(match self {
            TaskDescriptor::Instance(task) => task.clone(),
            TaskDescriptor::Factory(factory) => factory.create(scope)?,
            TaskDescriptor::Background(task) => task.clone(),
            TaskDescriptor::Barrier(task) => task.clone(),
            TaskDescriptor::LazyChain(task) => task.clone(),
        })
    }
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            TaskDescriptor::Instance(_) => "Instance",
            TaskDescriptor::Factory(_) => "Factory",
            TaskDescriptor::Background(_) => "Background",
            TaskDescriptor::Barrier(_) => "Barrier",
            TaskDescriptor::LazyChain(_) => "LazyChain",
        };
        write!(f, "{}({})", kind, self.name())
    }
}

/// Everything a running task gets to see.
#[derive(Clone)]
pub struct TaskContext {
    scope: Scope,
    tracker: Arc<dyn ProgressTracker>,
    monitor: SubMonitor,
    output: TaskOutput,
}

impl TaskContext {
    pub fn new(
        scope: Scope,
        tracker: Arc<dyn ProgressTracker>,
        monitor: SubMonitor,
        output: TaskOutput,
    ) -> Self {
        Self {
            scope,
            tracker,
            monitor,
            output,
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn tracker(&self) -> &Arc<dyn ProgressTracker> {
        &self.tracker
    }

    pub fn monitor(&self) -> &SubMonitor {
        &self.monitor
    }

    /// Shorthand for resolving a parameter from the task's scope.
    pub fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>, TaskingError> {
        self.scope.resolve::<T>()
    }

    pub fn resolve_named<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, TaskingError> {
        self.scope.resolve_named::<T>(name)
    }

    pub fn is_canceled(&self) -> bool {
        self.tracker.is_canceled()
    }

    pub fn check_canceled(&self) -> Result<(), TaskingError> {
        self.tracker.check_canceled()
    }

    /// Sets the status the engine records for this task unless the entry
    /// operation returns one itself.
    pub fn publish_status(&self, status: Status) {
        self.scope.set(status);
    }

    pub fn published_status(&self) -> Option<Status> {
        self.scope.get_local::<Status>().map(|status| (*status).clone())
    }

    pub fn stdout(&self) -> OutputStream {
        self.output.stdout()
    }

    pub fn stderr(&self) -> OutputStream {
        self.output.stderr()
    }

    pub(crate) fn with_output(mut self, output: TaskOutput) -> Self {
        self.output = output;
        self
    }

    /// Context for work derived from this task, e.g. a background run: a
    /// child scope and a tracker that only exposes naming and cancellation.
    pub fn derive(&self, name: &str) -> TaskContext {
        TaskContext {
            scope: self.scope.create_child(name),
            tracker: Arc::new(crate::progress::RestrictedTracker::new(self.tracker.clone())),
            monitor: self.monitor.clone(),
            output: self.output.clone(),
        }
    }
}
