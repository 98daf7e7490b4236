pub mod chain;
pub mod context;
pub mod runner;


pub use chain::*;
pub use context::*;
pub use runner::*;
