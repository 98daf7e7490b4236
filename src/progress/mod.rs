pub mod estimation;
pub mod monitor;
pub mod tracker;

pub use estimation::*;
pub use monitor::*;
pub use tracker::*;
