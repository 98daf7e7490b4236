//! # Taskchain
//!
//! An engine for running ordered chains of tasks with progress tracking,
//! lifecycle listeners, retries and background execution.
//!
//! ## Architecture Overview
//!
//! - **[`engine`]**: Chains, execution contexts and the retrying runner
//! - **[`task`]**: The task abstraction, single-task execution, background
//!   tasks with barriers, and lazily expanded sub-chains
//! - **[`progress`]**: Hierarchical progress monitors, per-task trackers
//!   and duration based work estimation
//! - **[`lifecycle`]**: Ordered listeners notified around chains and tasks,
//!   including the built-in [`StatusTracker`]
//! - **[`scope`]**: Hierarchical value lookup shared by chains and tasks
//! - **[`cli`]**: TOML chain files of external commands and the runner
//!   behind the `taskchain` binary
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use taskchain::{Engine, EngineConfig, ExecutionContext, FnChain, Status, Task, TaskContext};
//!
//! struct Compile;
//!
//! #[async_trait::async_trait]
//! impl Task for Compile {
//!     fn name(&self) -> String {
//!         "Compile".to_string()
//!     }
//!
//!     async fn execute(&self, _ctx: &TaskContext) -> anyhow::Result<Option<Status>> {
//!         Ok(None)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Engine::new(EngineConfig::default())?;
//!     let chain = FnChain::new("Build", |ctx: &mut ExecutionContext| {
//!         ctx.add_task(Compile);
//!         Ok(())
//!     })
//!     .with_retries(2)
//!     .into_arc();
//!
//!     let status = engine.run(chain).await?;
//!     println!("{}", status.to_tree_string());
//!     Ok(())
//! }
//! ```

pub mod cli;

/// Engine configuration loaded from TOML.
pub mod config;

pub mod duration;
pub mod engine;

/// Environment constants and path utilities.
pub mod env;

pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod progress;
pub mod scope;
pub mod status;
pub mod task;

pub use config::{EngineConfig, EstimationConfig, LogConfig};
pub use duration::{format_detailed_duration, format_duration};
pub use engine::{
    ContextInfo, Engine, EngineBuilder, EngineServices, ExecutionContext, FnChain, PreparedTasks,
    TaskChain,
};
pub use error::{Result, TaskingError};
pub use lifecycle::{
    ChainEvent, ChainSummary, LifecycleListener, ListenerRegistry, StatusTracker, TaskEvent,
};
pub use logging::init_logging;
pub use progress::{
    DurationEstimator, ProgressEstimationService, ProgressMonitor, ProgressTracker, SubMonitor,
};
pub use scope::Scope;
pub use status::{Severity, Status};
pub use task::{
    BackgroundExecutor, BackgroundTask, CreatableTask, Task, TaskContext, TaskDescriptor,
    TaskFactory,
};
