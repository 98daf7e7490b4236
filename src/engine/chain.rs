use crate::engine::context::ExecutionContext;
use std::fmt;
use std::sync::Arc;

/// Template describing which tasks a run consists of.
///
/// A chain never runs itself. It only populates a fresh [`ExecutionContext`]
/// from [`TaskChain::init`].
pub trait TaskChain: Send + Sync {
    fn name(&self) -> String;

    /// Number of attempts for a failing run. `None` uses the engine's
    /// configured default.
    fn retries(&self) -> Option<u32> {
        None
    }

    /// Runs of suppressed chains notify no lifecycle listeners.
    fn suppress_lifecycle(&self) -> bool {
        false
    }

    /// Appends this chain's tasks to `ctx`.
    fn init(&self, ctx: &mut ExecutionContext) -> anyhow::Result<()>;
}

type ChainInit = dyn Fn(&mut ExecutionContext) -> anyhow::Result<()> + Send + Sync;

/// A chain assembled from a closure.
#[derive(Clone)]
pub struct FnChain {
    name: String,
    retries: Option<u32>,
    suppress_lifecycle: bool,
    init: Arc<ChainInit>,
}

impl FnChain {
    pub fn new<F>(name: impl Into<String>, init: F) -> Self
    where
        F: Fn(&mut ExecutionContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            retries: None,
            suppress_lifecycle: false,
            init: Arc::new(init),
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn suppressed(mut self) -> Self {
        self.suppress_lifecycle = true;
        self
    }

    pub fn into_arc(self) -> Arc<dyn TaskChain> {
        Arc::new(self)
    }
}

impl TaskChain for FnChain {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn retries(&self) -> Option<u32> {
        self.retries
    }

    fn suppress_lifecycle(&self) -> bool {
        self.suppress_lifecycle
    }

    fn init(&self, ctx: &mut ExecutionContext) -> anyhow::Result<()> {
        (self.init)(ctx)
    }
}

impl fmt::Debug for FnChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnChain")
            .field("name", &self.name)
            .field("retries", &self.retries)
            .field("suppress_lifecycle", &self.suppress_lifecycle)
            .finish()
    }
}
