use std::path::PathBuf;

/// Errors raised by the tasking engine and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum TaskingError {
    /// Cooperative cancellation signal. Tasks return this (possibly wrapped
    /// in an `anyhow` chain) when they notice their tracker was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// A value requested from a scope is not present in the scope hierarchy
    #[error("No value for '{key}' in scope '{scope}'")]
    NotFound { key: String, scope: String },

    /// A value is present under the requested name but has a different type
    #[error("Value '{key}' in scope '{scope}' is not of type {expected}")]
    TypeMismatch {
        key: String,
        scope: String,
        expected: &'static str,
    },

    /// Insertion position outside of the task list
    #[error("Cannot insert task at {index}, context has {len} tasks")]
    IndexOutOfBounds { index: usize, len: usize },

    /// A task added by type could not be created
    #[error("Cannot create task '{task}': {source}")]
    Instantiation {
        task: String,
        #[source]
        source: anyhow::Error,
    },

    /// A chain initializer failed while populating a context
    #[error("Cannot initialize chain '{chain}': {source}")]
    ChainInit {
        chain: String,
        #[source]
        source: anyhow::Error,
    },

    /// Background work failed or was lost
    #[error("Background task '{task}' failed: {message}")]
    Background { task: String, message: String },

    /// Invalid configuration or chain definition
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TaskingError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Whether the given error, or anything in its cause chain, is a cancellation signal.
pub fn is_cancellation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<TaskingError>(),
            Some(TaskingError::Cancelled)
        )
    })
}

pub type Result<T> = std::result::Result<T, TaskingError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_cancellation_detection_through_context() {
        let direct = anyhow::Error::new(TaskingError::Cancelled);
        assert!(is_cancellation(&direct));

        let wrapped: anyhow::Result<()> =
            Err(TaskingError::Cancelled).context("while resolving parameters");
        assert!(is_cancellation(&wrapped.unwrap_err()));

        let other = anyhow::anyhow!("compilation failed");
        assert!(!is_cancellation(&other));
    }
}
