//! Command line argument parsing
//!
//! Subcommands:
//! - `run`: Execute a chain file
//! - `list`: Show the tasks a chain file expands to
//! - `show-config`: Show configuration discovery information

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ExecutionMode {
    Run(RunConfig),
    List(PathBuf),
    ShowConfig,
}

#[derive(Debug)]
pub struct RunConfig {
    pub chain_file: PathBuf,
    pub config_override: Option<PathBuf>,
    pub verbose: bool,
    pub dry_run: bool,
    pub json: bool,
}

#[derive(Debug, Parser)]
#[command(name = "taskchain")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Runs task chains with progress tracking, retries and background tasks")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Execute a chain file
    Run {
        /// Path to the chain definition (TOML)
        file: PathBuf,
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
        /// Print per-task durations
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,
        /// Show what would be executed without running
        #[arg(short = 'n', long = "dry-run")]
        dry_run: bool,
        /// Print the final status as JSON
        #[arg(long = "json")]
        json: bool,
    },
    /// List the tasks of a chain file
    List {
        /// Path to the chain definition (TOML)
        file: PathBuf,
    },
    /// Show configuration discovery information
    ShowConfig,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Run {
                file,
                config,
                verbose,
                dry_run,
                json,
            }) => {
                Self::check_chain_file(file)?;
                Ok(ExecutionMode::Run(RunConfig {
                    chain_file: file.clone(),
                    config_override: config.clone(),
                    verbose: *verbose,
                    dry_run: *dry_run,
                    json: *json,
                }))
            }
            Some(Commands::List { file }) => {
                Self::check_chain_file(file)?;
                Ok(ExecutionMode::List(file.clone()))
            }
            Some(Commands::ShowConfig) => Ok(ExecutionMode::ShowConfig),
            None => Err(
                "No command specified. Use 'taskchain --help' to see available commands."
                    .to_string(),
            ),
        }
    }

    /// Chain files are TOML; extension matching is case-insensitive
    fn check_chain_file(path: &Path) -> Result<(), String> {
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase();

        if extension == "toml" {
            Ok(())
        } else {
            Err(format!(
                "Unsupported chain file {:?}: expected a .toml file",
                path
            ))
        }
    }
}
