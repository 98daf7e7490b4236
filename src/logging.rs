//! Tracing subscriber setup.

use crate::config::LogConfig;
use crate::env::OUTPUT_LOG_TARGET;
use tracing_subscriber::EnvFilter;

/// Filter directives for `config`. `RUST_LOG` wins over both the configured
/// filter and the debug switch.
pub fn filter_directives(config: &LogConfig) -> String {
    if let Some(filter) = &config.filter {
        return filter.clone();
    }
    let level = if config.show_debug_logs { "debug" } else { "info" };
    format!("taskchain={},{}=info", level, OUTPUT_LOG_TARGET)
}

/// Installs the global subscriber. Calling it again is harmless.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
