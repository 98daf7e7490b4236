//! Configuration discovery and loading
//!
//! Discovery order:
//! 1. Current directory: ./taskchain.toml or ./.taskchain/config.toml
//! 2. User config: ~/.taskchain/config.toml
//! 3. Built-in defaults

use crate::config::EngineConfig;
use crate::env;
use crate::error::{Result, TaskingError};
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Discover and load configuration using the hierarchy
    pub fn discover_config() -> Result<EngineConfig> {
        if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {:?}", config_path);
            return EngineConfig::from_toml_file(config_path);
        }

        info!("No configuration file found, using defaults");
        Ok(EngineConfig::default())
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        Self::first_existing(&Self::get_config_candidates())
    }

    fn first_existing(candidates: &[PathBuf]) -> Option<PathBuf> {
        for candidate in candidates {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                debug!("Found config file: {:?}", candidate);
                return Some(candidate.clone());
            }
        }

        debug!("No config file found in discovery hierarchy");
        None
    }

    fn get_config_candidates() -> Vec<PathBuf> {
        Self::candidates_for(
            std_env::current_dir().ok().as_deref(),
            Self::get_home_dir().as_deref(),
        )
    }

    /// Configuration file candidates in priority order
    fn candidates_for(current_dir: Option<&Path>, home_dir: Option<&Path>) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(current_dir) = current_dir {
            candidates.push(env::project_config_file_path(current_dir));
            candidates.push(env::local_config_file_path(current_dir));
        }
        if let Some(home_dir) = home_dir {
            candidates.push(env::user_config_file_path(home_dir));
        }
        candidates
    }

    fn get_home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }

    /// Create a default config file in the user's home directory
    pub fn create_default_user_config() -> Result<PathBuf> {
        let home_dir = Self::get_home_dir()
            .ok_or_else(|| TaskingError::Config("Could not determine home directory".into()))?;
        Self::create_default_config_in(&home_dir)
    }

    fn create_default_config_in(home_dir: &Path) -> Result<PathBuf> {
        let config_dir = env::user_config_dir_path(home_dir);
        let config_path = env::user_config_file_path(home_dir);

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).map_err(|e| TaskingError::io(&config_dir, e))?;
            info!("Created configuration directory: {:?}", config_dir);
        }

        if config_path.exists() {
            warn!("Configuration file already exists: {:?}", config_path);
        } else {
            EngineConfig::default().to_toml_file(&config_path)?;
            info!("Created default configuration file: {:?}", config_path);
        }

        Ok(config_path)
    }

    /// Show configuration discovery information for debugging
    pub fn show_discovery_info() {
        println!("Configuration Discovery Hierarchy:");
        println!();

        let candidates = Self::get_config_candidates();
        for (i, candidate) in candidates.iter().enumerate() {
            let status = if candidate.is_file() {
                "✓ EXISTS"
            } else if candidate.exists() {
                "✗ NOT A FILE"
            } else {
                "✗ NOT FOUND"
            };
            println!("  {}. {:?} - {}", i + 1, candidate, status);
        }

        println!();
        match Self::first_existing(&candidates) {
            Some(found) => println!("Active configuration: {:?}", found),
            None => println!("Active configuration: Built-in defaults"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_candidate_order() {
        let candidates = ConfigDiscovery::candidates_for(
            Some(Path::new("/work/project")),
            Some(Path::new("/home/user")),
        );
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/work/project/taskchain.toml"),
                PathBuf::from("/work/project/.taskchain/config.toml"),
                PathBuf::from("/home/user/.taskchain/config.toml"),
            ]
        );

        let candidates = ConfigDiscovery::candidates_for(None, Some(Path::new("/home/user")));
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn test_first_existing_skips_missing() {
        let temp_dir = TempDir::new().unwrap();
        let project = temp_dir.path().join("project");
        let home = temp_dir.path().join("home");
        fs::create_dir_all(&project).unwrap();

        let created = ConfigDiscovery::create_default_config_in(&home).unwrap();
        let candidates = ConfigDiscovery::candidates_for(Some(&project), Some(&home));
        assert_eq!(ConfigDiscovery::first_existing(&candidates), Some(created));

        fs::write(project.join("taskchain.toml"), "default_retries = 4\n").unwrap();
        let found = ConfigDiscovery::first_existing(&candidates).unwrap();
        assert_eq!(found, project.join("taskchain.toml"));
        assert_eq!(
            EngineConfig::from_toml_file(found).unwrap().default_retries,
            4
        );
    }

    #[test]
    fn test_default_config_is_not_overwritten() {
        let temp_dir = TempDir::new().unwrap();
        let path = ConfigDiscovery::create_default_config_in(temp_dir.path()).unwrap();
        fs::write(&path, "default_retries = 2\n").unwrap();

        ConfigDiscovery::create_default_config_in(temp_dir.path()).unwrap();
        let config = EngineConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.default_retries, 2);
    }
}
