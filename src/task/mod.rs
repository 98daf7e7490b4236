pub mod background;
pub mod execution;
pub mod lazy;
pub mod output;
pub mod types;

#[cfg(test)]
mod tests;

pub use background::*;
pub use execution::*;
pub use lazy::*;
pub use output::*;
pub use types::*;
