use crate::config::EngineConfig;
use crate::engine::chain::TaskChain;
use crate::engine::context::ExecutionContext;
use crate::error::TaskingError;
use crate::lifecycle::{ListenerRegistry, STATUS_TRACKER_PRIORITY, StatusTracker};
use crate::progress::{DurationEstimator, ProgressEstimationService, ProgressMonitor};
use crate::scope::Scope;
use crate::status::{Severity, Status};
use crate::task::BackgroundExecutor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Resources shared by an engine and every nested engine it creates.
pub struct EngineServices {
    pub config: EngineConfig,
    pub listeners: ListenerRegistry,
    pub estimation: Option<Arc<dyn ProgressEstimationService>>,
    pub background: Arc<BackgroundExecutor>,
}

impl EngineServices {
    /// Listeners every engine has unless told otherwise.
    pub fn default_listeners() -> ListenerRegistry {
        let mut registry = ListenerRegistry::new();
        registry.register::<StatusTracker>(STATUS_TRACKER_PRIORITY);
        registry
    }
}

/// Runs chains: creates their contexts and drives them through the retry
/// loop.
#[derive(Clone)]
pub struct Engine {
    scope: Scope,
    services: Arc<EngineServices>,
}

pub struct EngineBuilder {
    config: EngineConfig,
    listeners: Option<ListenerRegistry>,
    estimation: Option<Option<Arc<dyn ProgressEstimationService>>>,
    background: Option<Arc<BackgroundExecutor>>,
}

impl EngineBuilder {
    pub fn listeners(mut self, listeners: ListenerRegistry) -> Self {
        self.listeners = Some(listeners);
        self
    }

    pub fn estimation(mut self, service: Arc<dyn ProgressEstimationService>) -> Self {
        self.estimation = Some(Some(service));
        self
    }

    pub fn without_estimation(mut self) -> Self {
        self.estimation = Some(None);
        self
    }

    pub fn background(mut self, executor: Arc<BackgroundExecutor>) -> Self {
        self.background = Some(executor);
        self
    }

    pub fn build(self) -> Result<Engine, TaskingError> {
        self.config.validate()?;

        let estimation = match self.estimation {
            Some(service) => service,
            None => configured_estimation(&self.config)?,
        };
        let background = self.background.unwrap_or_else(|| {
            Arc::new(match self.config.background_threads {
                Some(threads) => BackgroundExecutor::new(threads),
                None => BackgroundExecutor::with_available_parallelism(),
            })
        });

        let services = EngineServices {
            listeners: self
                .listeners
                .unwrap_or_else(EngineServices::default_listeners),
            config: self.config,
            estimation,
            background,
        };
        Ok(Engine::from_services(
            Scope::root("engine"),
            Arc::new(services),
        ))
    }
}

fn configured_estimation(
    config: &EngineConfig,
) -> Result<Option<Arc<dyn ProgressEstimationService>>, TaskingError> {
    if !config.estimation.enabled {
        return Ok(None);
    }
    let resolution = Duration::from_millis(config.estimation.resolution_ms);
    let estimator = match &config.estimation.store_path {
        Some(path) => DurationEstimator::with_store(resolution, path)?,
        None => DurationEstimator::new(resolution),
    };
    Ok(Some(Arc::new(estimator)))
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            listeners: None,
            estimation: None,
            background: None,
        }
    }

    pub fn new(config: EngineConfig) -> Result<Self, TaskingError> {
        Self::builder(config).build()
    }

    /// An engine on `scope` sharing existing services, e.g. for nested
    /// chains.
    pub fn from_services(scope: Scope, services: Arc<EngineServices>) -> Self {
        scope.set_arc(services.clone());
        scope.set_arc(services.background.clone());
        Self { scope, services }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn services(&self) -> &Arc<EngineServices> {
        &self.services
    }

    pub fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    /// Creates a fresh context for `chain` in a child of the engine scope.
    pub fn create_context(
        &self,
        chain: Arc<dyn TaskChain>,
    ) -> Result<ExecutionContext, TaskingError> {
        ExecutionContext::new(
            self.scope.create_child(chain.name()),
            chain,
            self.services.clone(),
        )
    }

    /// Runs `ctx` until it succeeds or its attempts are used up. Every
    /// attempt re-runs all tasks.
    ///
    /// Returns `Err` only for setup failures and for a cancellation that was
    /// requested before an attempt started. Cancelled attempts are not
    /// retried, although `Cancel` ranks above `Error`: only `Error` outcomes
    /// use up further attempts.
    pub async fn run_task_chain(
        &self,
        ctx: &mut ExecutionContext,
        monitor: &ProgressMonitor,
    ) -> Result<Status, TaskingError> {
        if ctx.is_empty() {
            return Ok(Status::default());
        }

        let chain = ctx.chain_name();
        let retries = ctx.retries();
        let mut status = Status::default();
        for attempt in 1..=retries {
            if monitor.is_canceled() {
                return Err(TaskingError::Cancelled);
            }

            status = ctx.execute(monitor).await?;
            if !status.is_halting() {
                return Ok(status);
            }
            if status.severity() == Severity::Cancel {
                warn!(chain = %chain, attempt, "Chain cancelled");
                return Ok(status);
            }

            if attempt == retries {
                error!(chain = %chain, attempt, "Cannot execute '{}'", chain);
            } else {
                info!(chain = %chain, attempt, retries, "Inhibiting failure on '{}', retrying...", chain);
            }
        }
        Ok(status)
    }

    /// Creates a context for `chain` and runs it with `monitor`.
    pub async fn run_with_monitor(
        &self,
        chain: Arc<dyn TaskChain>,
        monitor: &ProgressMonitor,
    ) -> Result<Status, TaskingError> {
        let mut ctx = self.create_context(chain)?;
        self.run_task_chain(&mut ctx, monitor).await
    }

    pub async fn run(&self, chain: Arc<dyn TaskChain>) -> Result<Status, TaskingError> {
        let monitor = ProgressMonitor::new(chain.name());
        self.run_with_monitor(chain, &monitor).await
    }
}
