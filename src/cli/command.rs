//! External process steps of chain files.

use crate::error::TaskingError;
use crate::scope::Scope;
use crate::status::Status;
use crate::task::{OutputCapture, OutputStream, Task, TaskContext};
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// How often a running process checks for cancellation.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A command step as written in a chain file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandSpec {
    /// Display name; defaults to the command line
    pub name: Option<String>,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Relative paths are resolved against the chain file's directory
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Explicit amount of work; remembered durations are used when unset
    pub work: Option<u32>,
    /// Route the process output to the log
    #[serde(default)]
    pub capture_output: bool,
    /// Run off the main sequence until the next barrier
    #[serde(default)]
    pub background: bool,
    /// Report a non-zero exit as a warning instead of an error
    #[serde(default)]
    pub allow_failure: bool,
}

/// Runs one external process.
pub struct CommandTask {
    spec: CommandSpec,
    base_dir: PathBuf,
}

impl CommandTask {
    pub fn new(spec: CommandSpec, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            spec,
            base_dir: base_dir.into(),
        }
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    /// The command line, quoted for a POSIX shell.
    pub fn command_line(&self) -> String {
        std::iter::once(&self.spec.command)
            .chain(self.spec.args.iter())
            .map(|part| shell_escape::escape(part.as_str().into()).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn working_dir(&self) -> PathBuf {
        match &self.spec.working_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.base_dir.join(dir),
            None => self.base_dir.clone(),
        }
    }

    /// Location of the program, if it can be found.
    pub fn resolve_program(&self) -> Option<PathBuf> {
        let program = Path::new(&self.spec.command);
        if program.components().count() > 1 {
            let path = self.working_dir().join(program);
            return path.is_file().then_some(path);
        }
        which::which(&self.spec.command).ok()
    }

    async fn wait_or_cancel(
        &self,
        child: &mut tokio::process::Child,
        ctx: &TaskContext,
    ) -> anyhow::Result<std::process::ExitStatus> {
        loop {
            let waited = tokio::time::timeout(CANCEL_POLL_INTERVAL, child.wait()).await;
            match waited {
                Ok(status) => {
                    return status.with_context(|| format!("Cannot wait for '{}'", self.name()));
                }
                Err(_) if ctx.is_canceled() => {
                    warn!(task = %self.name(), "Cancelled, killing process");
                    if let Err(e) = child.kill().await {
                        warn!(task = %self.name(), "Cannot kill process: {}", e);
                    }
                    return Err(TaskingError::Cancelled.into());
                }
                Err(_) => {}
            }
        }
    }
}

async fn pump<R>(reader: Option<R>, mut out: OutputStream)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Err(e) = writeln!(out, "{}", line) {
                    debug!("Cannot forward process output: {}", e);
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Cannot read process output: {}", e);
                break;
            }
        }
    }
    if let Err(e) = out.flush() {
        debug!("Cannot flush process output: {}", e);
    }
}

#[async_trait]
impl Task for CommandTask {
    fn name(&self) -> String {
        self.spec
            .name
            .clone()
            .unwrap_or_else(|| self.command_line())
    }

    async fn execute(&self, ctx: &TaskContext) -> anyhow::Result<Option<Status>> {
        ctx.check_canceled()?;
        let name = self.name();
        let Some(program) = self.resolve_program() else {
            warn!(task = %name, program = %self.spec.command, "Program not found");
            return Ok(Some(Status::error(format!(
                "{}: program '{}' not found",
                name, self.spec.command
            ))));
        };
        info!(task = %name, command = %self.command_line(), "Starting process");

        let mut command = Command::new(program);
        command
            .args(&self.spec.args)
            .envs(&self.spec.env)
            .current_dir(self.working_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .with_context(|| format!("Cannot start '{}'", self.command_line()))?;

        let out = tokio::spawn(pump(child.stdout.take(), ctx.stdout()));
        let err = tokio::spawn(pump(child.stderr.take(), ctx.stderr()));

        let exit = self.wait_or_cancel(&mut child, ctx).await;
        // the pipes close once the process is gone
        let _ = out.await;
        let _ = err.await;
        let exit = exit?;

        if exit.success() {
            debug!(task = %name, "Process finished");
            return Ok(None);
        }

        let code = exit
            .code()
            .map(|code| code.to_string())
            .unwrap_or_else(|| "a signal".to_string());
        let message = format!("{} exited with {}", name, code);
        Ok(Some(if self.spec.allow_failure {
            Status::warning(message)
        } else {
            Status::error(message)
        }))
    }

    fn declares_work_amount(&self) -> bool {
        self.spec.work.is_some()
    }

    fn work_amount(&self, _scope: &Scope) -> anyhow::Result<u32> {
        Ok(self.spec.work.unwrap_or(1))
    }

    fn output_capture(&self) -> Option<OutputCapture> {
        self.spec.capture_output.then(OutputCapture::default)
    }
}
