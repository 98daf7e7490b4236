//! Lifecycle notifications around context execution.

pub mod listener;
pub mod status_tracker;

pub use listener::*;
pub use status_tracker::*;
