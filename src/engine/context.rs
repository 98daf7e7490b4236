//! Per-run container of a chain's tasks, and the two-phase execution of
//! those tasks.
//!
//! Execution first instantiates every descriptor and computes the work
//! amount of each task (from the estimation service, from the task itself,
//! or 1). The sum sizes the root progress monitor. Tasks then run strictly
//! one after another, each in its own child scope with its own slice of the
//! monitor, until the list is exhausted or a task ends with a halting status.

use crate::engine::chain::TaskChain;
use crate::engine::runner::EngineServices;
use crate::error::TaskingError;
use crate::lifecycle::{ChainEvent, LifecycleListener, LifecyclePoint, TaskEvent};
use crate::progress::{
    ProgressEstimationService, ProgressMonitor, ProgressTracker, RestrictedTracker,
    TaskProgressTracker,
};
use crate::scope::Scope;
use crate::status::Status;
use crate::task::{
    BackgroundTask, CreatableTask, LazyChainTask, Task, TaskContext, TaskDescriptor, TaskFactory,
    TaskOutput, execute_single_task, panic_message,
};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Identity of the running context, available to tasks through the scope.
#[derive(Debug, Clone)]
pub struct ContextInfo {
    pub id: Uuid,
    pub chain: String,
}

/// Names of the prepared tasks of the latest execution, in order.
#[derive(Debug, Clone, Default)]
pub struct PreparedTasks(pub Vec<String>);

struct PreparedTask {
    task: Arc<dyn Task>,
    name: String,
    scope: Scope,
    amount: u64,
    estimation_id: Option<String>,
}

/// One concrete run of a [`TaskChain`].
pub struct ExecutionContext {
    id: Uuid,
    chain: Arc<dyn TaskChain>,
    scope: Scope,
    tasks: Vec<TaskDescriptor>,
    prepared: Vec<Arc<dyn Task>>,
    listeners: Vec<Arc<dyn LifecycleListener>>,
    services: Arc<EngineServices>,
    status: Status,
}

impl ExecutionContext {
    /// Creates the context and lets `chain` populate it.
    ///
    /// Background tasks that no barrier in the context waits for are joined
    /// by one trailing barrier.
    pub fn new(
        scope: Scope,
        chain: Arc<dyn TaskChain>,
        services: Arc<EngineServices>,
    ) -> Result<Self, TaskingError> {
        let listeners = services.listeners.instantiate(&scope);
        let chain_name = chain.name();
        let id = Uuid::new_v4();
        scope.set(ContextInfo {
            id,
            chain: chain_name.clone(),
        });

        let mut ctx = Self {
            id,
            chain: chain.clone(),
            scope,
            tasks: Vec::new(),
            prepared: Vec::new(),
            listeners,
            services,
            status: Status::default(),
        };

        chain
            .init(&mut ctx)
            .map_err(|source| TaskingError::ChainInit {
                chain: chain_name.clone(),
                source,
            })?;

        let unawaited = ctx.unawaited_background_tasks();
        if let Some(barrier) = BackgroundTask::all_barrier(&unawaited) {
            debug!(chain = %chain_name, count = unawaited.len(), "Joining background tasks");
            ctx.tasks.push(TaskDescriptor::Barrier(barrier));
        }

        if !ctx.is_empty() {
            ctx.notify_chain(LifecyclePoint::CreateContext);
        }
        Ok(ctx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn chain(&self) -> &Arc<dyn TaskChain> {
        &self.chain
    }

    pub fn chain_name(&self) -> String {
        self.chain.name()
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn tasks(&self) -> &[TaskDescriptor] {
        &self.tasks
    }

    /// Task instances of the latest execution.
    pub fn prepared_tasks(&self) -> &[Arc<dyn Task>] {
        &self.prepared
    }

    /// Status of the latest execution.
    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of attempts the engine makes, at least 1.
    pub fn retries(&self) -> u32 {
        self.chain
            .retries()
            .unwrap_or(self.services.config.default_retries)
            .max(1)
    }

    pub fn is_lifecycle_suppressed(&self) -> bool {
        self.chain.suppress_lifecycle()
    }

    pub fn add_task(&mut self, task: impl Task + 'static) -> &mut Self {
        self.add_descriptor(TaskDescriptor::Instance(Arc::new(task)))
    }

    pub fn add_task_arc(&mut self, task: Arc<dyn Task>) -> &mut Self {
        self.add_descriptor(TaskDescriptor::Instance(task))
    }

    /// Adds a task by type; it is created from the context scope when
    /// execution starts.
    pub fn add_task_type<T: CreatableTask>(&mut self) -> &mut Self {
        self.add_descriptor(TaskDescriptor::Factory(TaskFactory::of::<T>()))
    }

    pub fn add_factory(&mut self, factory: TaskFactory) -> &mut Self {
        self.add_descriptor(TaskDescriptor::Factory(factory))
    }

    pub fn add_descriptor(&mut self, descriptor: TaskDescriptor) -> &mut Self {
        self.tasks.push(descriptor);
        self
    }

    /// Expands `chain` into this context right away.
    pub fn add_chain(&mut self, chain: &dyn TaskChain) -> anyhow::Result<()> {
        debug!(parent = %self.chain.name(), chain = %chain.name(), "Expanding chain inline");
        chain.init(self)
    }

    pub fn add_task_at(
        &mut self,
        index: usize,
        descriptor: TaskDescriptor,
    ) -> Result<(), TaskingError> {
        if index > self.tasks.len() {
            return Err(TaskingError::IndexOutOfBounds {
                index,
                len: self.tasks.len(),
            });
        }
        self.tasks.insert(index, descriptor);
        Ok(())
    }

    /// Adds `chain` to be created and run only when the sequence reaches it.
    pub fn add_lazy_chain(&mut self, chain: Arc<dyn TaskChain>) -> &mut Self {
        self.add_descriptor(TaskDescriptor::LazyChain(Arc::new(LazyChainTask::new(chain))))
    }

    /// Adds `task` to run in the background and returns its handle, e.g. to
    /// place a barrier with [`ExecutionContext::add_barrier`].
    pub fn add_background(&mut self, task: impl Task + 'static) -> Arc<BackgroundTask> {
        let background = BackgroundTask::wrap(task);
        self.add_descriptor(TaskDescriptor::Background(background.clone()));
        background
    }

    pub fn add_background_task(&mut self, task: Arc<BackgroundTask>) -> &mut Self {
        self.add_descriptor(TaskDescriptor::Background(task))
    }

    /// Adds a task that waits for `task` to finish.
    pub fn add_barrier(&mut self, task: &Arc<BackgroundTask>) -> &mut Self {
        self.add_descriptor(TaskDescriptor::Barrier(task.barrier()))
    }

    fn unawaited_background_tasks(&self) -> Vec<Arc<BackgroundTask>> {
        let barriers: Vec<_> = self
            .tasks
            .iter()
            .filter_map(|descriptor| match descriptor {
                TaskDescriptor::Barrier(barrier) => Some(barrier),
                _ => None,
            })
            .collect();

        self.tasks
            .iter()
            .filter_map(|descriptor| match descriptor {
                TaskDescriptor::Background(task) => Some(task),
                _ => None,
            })
            .filter(|task| !barriers.iter().any(|barrier| barrier.awaits(task)))
            .cloned()
            .collect()
    }

    fn prepare(&mut self) -> Result<Vec<PreparedTask>, TaskingError> {
        let instances = self
            .tasks
            .iter()
            .map(|descriptor| descriptor.instantiate(&self.scope))
            .collect::<Result<Vec<_>, _>>()?;

        self.scope.set(PreparedTasks(
            instances.iter().map(|task| task.name()).collect(),
        ));
        self.prepared = instances.clone();

        let estimation = self.services.estimation.as_deref();
        Ok(instances
            .into_iter()
            .map(|task| {
                let name = task.name();
                let estimation_id = estimation.and_then(|service| service.calculate_id(&*task));
                let amount = self.work_amount(&*task, &name, estimation, estimation_id.as_deref());
                PreparedTask {
                    scope: self.scope.create_child(name.clone()),
                    task,
                    name,
                    amount,
                    estimation_id,
                }
            })
            .collect())
    }

    fn work_amount(
        &self,
        task: &dyn Task,
        name: &str,
        estimation: Option<&dyn ProgressEstimationService>,
        estimation_id: Option<&str>,
    ) -> u64 {
        if let (Some(service), Some(id)) = (estimation, estimation_id) {
            return u64::from(service.estimated_ticks(id));
        }
        if !task.declares_work_amount() {
            return 1;
        }
        match task.work_amount(&self.scope) {
            Ok(amount) => u64::from(amount),
            Err(e) => {
                debug!(task = name, "Failed to determine amount of work: {:#}", e);
                1
            }
        }
    }

    /// Runs all tasks once. Listeners see the end of the chain and the
    /// disposal of the context no matter how the run ends, including a panic
    /// in a listener or estimation hook, which is re-raised afterwards.
    pub async fn execute(&mut self, monitor: &ProgressMonitor) -> Result<Status, TaskingError> {
        let chain_name = self.chain.name();
        self.status = Status::multi(format!("Chain: {}", chain_name));

        let prepared = self.prepare()?;
        let outcome = AssertUnwindSafe(self.run_prepared(&chain_name, &prepared, monitor))
            .catch_unwind()
            .await;
        if let Err(panic) = &outcome {
            let message = panic_message(&**panic);
            error!(chain = %chain_name, "Chain aborted: {}", message);
            self.status
                .add(Status::error(format!("Chain {} aborted: {}", chain_name, message)));
        }

        self.settle_background(&chain_name).await;

        self.notify_chain(LifecyclePoint::FinishTaskChain);
        self.notify_chain(LifecyclePoint::DisposeContext);

        if let Err(panic) = outcome {
            std::panic::resume_unwind(panic);
        }
        Ok(self.status.clone())
    }

    async fn run_prepared(
        &mut self,
        chain_name: &str,
        prepared: &[PreparedTask],
        monitor: &ProgressMonitor,
    ) {
        let total: u64 = prepared.iter().map(|task| task.amount).sum();

        self.notify_chain(LifecyclePoint::BeginTaskChain);
        monitor.begin(chain_name, total);
        info!(chain = %chain_name, tasks = prepared.len(), total, "Executing chain");

        let estimation = self.services.estimation.clone();
        for (index, prepared) in prepared.iter().enumerate() {
            let slice = monitor.split(prepared.amount);
            slice.set_task_name(&prepared.name);

            let task_tracker = Arc::new(TaskProgressTracker::new(&prepared.name, slice.clone()));
            prepared.scope.set_arc(task_tracker.clone());
            let mut tracker: Arc<dyn ProgressTracker> = task_tracker;

            let estimated = estimation
                .as_ref()
                .zip(prepared.estimation_id.as_deref());
            if let Some((service, id)) = estimated {
                service.begin(id, tracker.clone());
                tracker = Arc::new(RestrictedTracker::new(tracker));
            }

            self.notify_task(LifecyclePoint::BeginTask, index, prepared, None);

            let task_ctx = TaskContext::new(
                prepared.scope.clone(),
                tracker,
                slice.clone(),
                TaskOutput::passthrough(&prepared.name),
            );
            let mut task_status = execute_single_task(&prepared.task, task_ctx).await;

            if monitor.is_canceled() {
                task_status = Status::cancel(format!("Cancelled: {}", prepared.name));
                prepared.scope.set(task_status.clone());
            }
            self.status.add(task_status.clone());

            if let Some((service, id)) = estimated {
                service.finish(id, &task_status);
            }
            slice.done();

            self.notify_task(LifecyclePoint::FinishTask, index, prepared, Some(&task_status));

            if task_status.is_halting() {
                error!(chain = %chain_name, task = %prepared.name, "Task aborted with status {}", task_status);
                break;
            }
        }
    }

    /// Waits for background work of this context that no executed barrier
    /// joined. Outcomes are not added to the aggregate status.
    async fn settle_background(&self, chain_name: &str) {
        for descriptor in &self.tasks {
            if let TaskDescriptor::Background(task) = descriptor
                && task.is_started()
            {
                debug!(chain = %chain_name, task = %task.name(), "Settling background task");
                task.settle().await;
            }
        }
    }

    fn notify_chain(&self, point: LifecyclePoint) {
        if self.is_lifecycle_suppressed() {
            return;
        }
        let chain = self.chain.name();
        let event = ChainEvent {
            context_id: self.id,
            chain: &chain,
            scope: &self.scope,
            status: &self.status,
        };
        debug!(chain = %chain, %point, "Lifecycle notification");
        for listener in &self.listeners {
            match point {
                LifecyclePoint::CreateContext => listener.create_context(&event),
                LifecyclePoint::BeginTaskChain => listener.begin_task_chain(&event),
                LifecyclePoint::FinishTaskChain => listener.finish_task_chain(&event),
                LifecyclePoint::DisposeContext => listener.dispose_context(&event),
                LifecyclePoint::BeginTask | LifecyclePoint::FinishTask => {}
            }
        }
    }

    fn notify_task(
        &self,
        point: LifecyclePoint,
        index: usize,
        prepared: &PreparedTask,
        status: Option<&Status>,
    ) {
        if self.is_lifecycle_suppressed() {
            return;
        }
        let chain = self.chain.name();
        let event = TaskEvent {
            context_id: self.id,
            chain: &chain,
            task: &prepared.name,
            index,
            work_amount: prepared.amount,
            scope: &prepared.scope,
            status,
        };
        for listener in &self.listeners {
            match point {
                LifecyclePoint::BeginTask => listener.begin_task(&event),
                LifecyclePoint::FinishTask => listener.finish_task(&event),
                _ => {}
            }
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("chain", &self.chain.name())
            .field("tasks", &self.tasks)
            .finish()
    }
}
