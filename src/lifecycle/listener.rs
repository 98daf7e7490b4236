use crate::scope::Scope;
use crate::status::Status;
use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Priority of listeners that do not ask for one.
pub const DEFAULT_PRIORITY: i32 = 10;

/// Points in a context's life at which listeners are notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePoint {
    CreateContext,
    BeginTaskChain,
    BeginTask,
    FinishTask,
    FinishTaskChain,
    DisposeContext,
}

impl LifecyclePoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePoint::CreateContext => "create_context",
            LifecyclePoint::BeginTaskChain => "begin_task_chain",
            LifecyclePoint::BeginTask => "begin_task",
            LifecyclePoint::FinishTask => "finish_task",
            LifecyclePoint::FinishTaskChain => "finish_task_chain",
            LifecyclePoint::DisposeContext => "dispose_context",
        }
    }
}

impl fmt::Display for LifecyclePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of context-level notifications.
pub struct ChainEvent<'a> {
    pub context_id: Uuid,
    pub chain: &'a str,
    pub scope: &'a Scope,
    /// Aggregate status collected so far
    pub status: &'a Status,
}

/// Payload of task-level notifications.
pub struct TaskEvent<'a> {
    pub context_id: Uuid,
    pub chain: &'a str,
    pub task: &'a str,
    /// Position of the task in the prepared task list
    pub index: usize,
    pub work_amount: u64,
    /// The task's own scope
    pub scope: &'a Scope,
    /// Final task status, only set for [`LifecyclePoint::FinishTask`]
    pub status: Option<&'a Status>,
}

/// Observer of context lifecycles. All methods default to doing nothing.
pub trait LifecycleListener: Send + Sync {
    fn create_context(&self, _event: &ChainEvent<'_>) {}

    fn begin_task_chain(&self, _event: &ChainEvent<'_>) {}

    fn begin_task(&self, _event: &TaskEvent<'_>) {}

    fn finish_task(&self, _event: &TaskEvent<'_>) {}

    fn finish_task_chain(&self, _event: &ChainEvent<'_>) {}

    fn dispose_context(&self, _event: &ChainEvent<'_>) {}
}

type ListenerFactory = dyn Fn(&Scope) -> Arc<dyn LifecycleListener> + Send + Sync;

#[derive(Clone)]
struct ListenerRegistration {
    name: String,
    priority: i32,
    factory: Arc<ListenerFactory>,
}

/// Known listener types. Every context gets fresh instances, ordered by
/// descending priority and then by name.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    entries: Vec<ListenerRegistration>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener type. Each instance is also stored in the context
    /// scope under its type, so tasks can reach it.
    pub fn register<L>(&mut self, priority: i32) -> &mut Self
    where
        L: LifecycleListener + Default + 'static,
    {
        self.register_with(type_name::<L>(), priority, |scope| {
            let listener = Arc::new(L::default());
            scope.set_arc(listener.clone());
            listener as Arc<dyn LifecycleListener>
        })
    }

    pub fn register_with<F>(&mut self, name: impl Into<String>, priority: i32, factory: F) -> &mut Self
    where
        F: Fn(&Scope) -> Arc<dyn LifecycleListener> + Send + Sync + 'static,
    {
        self.entries.push(ListenerRegistration {
            name: name.into(),
            priority,
            factory: Arc::new(factory),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered names in notification order.
    pub fn ordered_names(&self) -> Vec<String> {
        self.ordered()
            .into_iter()
            .map(|entry| entry.name.clone())
            .collect()
    }

    /// Creates one fresh listener per registration, in notification order.
    pub fn instantiate(&self, scope: &Scope) -> Vec<Arc<dyn LifecycleListener>> {
        self.ordered()
            .into_iter()
            .map(|entry| (entry.factory)(scope))
            .collect()
    }

    fn ordered(&self) -> Vec<&ListenerRegistration> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.name.cmp(&b.name))
        });
        entries
    }
}
