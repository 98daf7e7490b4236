//! Command line runner for chain files
//!
//! This module contains argument parsing, the TOML chain file format, the
//! external command task and configuration discovery.

pub mod args;
pub mod chain_file;
pub mod command;
pub mod config;

pub use args::{Args, Commands, ExecutionMode, RunConfig};
pub use chain_file::{ChainDefinition, FileChain, LazyFileChain, TaskEntry};
pub use command::{CommandSpec, CommandTask};
pub use config::ConfigDiscovery;
