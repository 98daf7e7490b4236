//! Engine configuration, loaded from TOML.

use crate::error::{Result, TaskingError};
use crate::progress::DEFAULT_RESOLUTION_MS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Attempts for chains that do not declare their own retry count
    pub default_retries: u32,
    /// Size of the background pool; available parallelism when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_threads: Option<usize>,
    pub log: LogConfig,
    pub estimation: EstimationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_retries: 1,
            background_threads: None,
            log: LogConfig::default(),
            estimation: EstimationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Development switch for debug output
    pub show_debug_logs: bool,
    /// `EnvFilter` directives, overriding `show_debug_logs` when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            show_debug_logs: true,
            filter: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationConfig {
    pub enabled: bool,
    /// Where remembered durations are kept; in memory only when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
    pub resolution_ms: u64,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store_path: None,
            resolution_ms: DEFAULT_RESOLUTION_MS,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| TaskingError::io(path, e))?;
        Self::from_toml_str(&content)
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = self.to_toml_string()?;
        fs::write(path, content).map_err(|e| TaskingError::io(path, e))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| TaskingError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_retries == 0 {
            return Err(TaskingError::Config(
                "default_retries must be at least 1".to_string(),
            ));
        }
        if self.background_threads == Some(0) {
            return Err(TaskingError::Config(
                "background_threads must be at least 1".to_string(),
            ));
        }
        if self.estimation.resolution_ms == 0 {
            return Err(TaskingError::Config(
                "estimation.resolution_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
