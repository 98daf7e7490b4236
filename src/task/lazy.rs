use crate::engine::{Engine, EngineServices, TaskChain};
use crate::status::Status;
use crate::task::types::{Task, TaskContext};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Creates and runs a nested chain only when the sequence reaches it, so
/// the chain can depend on what earlier tasks did.
pub struct LazyChainTask {
    chain: Arc<dyn TaskChain>,
}

impl LazyChainTask {
    pub fn new(chain: Arc<dyn TaskChain>) -> Self {
        Self { chain }
    }

    pub fn chain(&self) -> &Arc<dyn TaskChain> {
        &self.chain
    }
}

#[async_trait]
impl Task for LazyChainTask {
    fn name(&self) -> String {
        format!("Lazy: {}", self.chain.name())
    }

    async fn execute(&self, ctx: &TaskContext) -> anyhow::Result<Option<Status>> {
        let services = ctx.resolve::<EngineServices>()?;
        let engine = Engine::from_services(ctx.scope().create_child(self.name()), services);

        let mut nested = engine.create_context(self.chain.clone())?;
        let monitor = ctx.monitor().nested_monitor(self.chain.name());
        debug!(chain = %self.chain.name(), tasks = nested.tasks().len(), "Running lazy chain");

        let status = engine.run_task_chain(&mut nested, &monitor).await?;
        Ok(Some(status))
    }
}
