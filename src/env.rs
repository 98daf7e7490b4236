//! Environment constants and path utilities.
//!
//! This module centralizes the file and directory names used by the engine
//! and the command line runner.

use std::path::{Path, PathBuf};

/// Application directory name (hidden directory like .git, .vscode)
pub const APP_DIR_NAME: &str = ".taskchain";

/// Configuration file name inside the application directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name at the top of a project
pub const PROJECT_CONFIG_FILE_NAME: &str = "taskchain.toml";

/// Remembered task durations, relative to the application directory
pub const ESTIMATES_FILE_NAME: &str = "estimates.json";

/// Log target for captured task output
pub const OUTPUT_LOG_TARGET: &str = "taskchain::output";

/// Build the application directory path below `root`
pub fn app_dir_path(root: &Path) -> PathBuf {
    root.join(APP_DIR_NAME)
}

/// Build config directory path in user's home directory
pub fn user_config_dir_path(home_dir: &Path) -> PathBuf {
    app_dir_path(home_dir)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build local config file path in current directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    app_dir_path(current_dir).join(CONFIG_FILE_NAME)
}

/// Build the project config file path in current directory
pub fn project_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(PROJECT_CONFIG_FILE_NAME)
}

/// Build the default estimation store path below `root`
pub fn estimates_file_path(root: &Path) -> PathBuf {
    app_dir_path(root).join(ESTIMATES_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_paths() {
        let home_dir = Path::new("/home/user");
        let current_dir = Path::new("/current/project");

        assert_eq!(
            user_config_file_path(home_dir),
            Path::new("/home/user/.taskchain/config.toml")
        );
        assert_eq!(
            local_config_file_path(current_dir),
            Path::new("/current/project/.taskchain/config.toml")
        );
        assert_eq!(
            project_config_file_path(current_dir),
            Path::new("/current/project/taskchain.toml")
        );
        assert_eq!(
            estimates_file_path(current_dir),
            Path::new("/current/project/.taskchain/estimates.json")
        );
    }
}
