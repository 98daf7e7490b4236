//! Standard output handling for running tasks.
//!
//! Tasks write through [`TaskContext::stdout`](crate::task::TaskContext::stdout)
//! and `stderr`. When a task declares an [`OutputCapture`], complete lines are
//! routed to the log instead of the process streams. Partial lines are flushed
//! when the redirection ends, whether the task succeeded or not.

use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info};

/// Which streams a task wants routed to the log.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct OutputCapture {
    pub out: bool,
    pub err: bool,
    /// Send stderr wherever stdout goes instead of the error log
    pub err_to_out: bool,
}

impl Default for OutputCapture {
    fn default() -> Self {
        Self {
            out: true,
            err: true,
            err_to_out: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Route {
    Stdout,
    Stderr,
    LogInfo,
    LogError,
}

impl Route {
    fn for_capture(capture: Option<OutputCapture>) -> (Route, Route) {
        let Some(capture) = capture else {
            return (Route::Stdout, Route::Stderr);
        };

        let out = if capture.out {
            Route::LogInfo
        } else {
            Route::Stdout
        };
        let err = match (capture.err, capture.err_to_out) {
            (false, _) => Route::Stderr,
            (true, true) => out,
            (true, false) => Route::LogError,
        };
        (out, err)
    }
}

/// Per-task output routing. Cloning shares the line buffers.
#[derive(Clone)]
pub struct TaskOutput {
    task: Arc<str>,
    out: Route,
    err: Route,
    out_buffer: Arc<Mutex<Vec<u8>>>,
    err_buffer: Arc<Mutex<Vec<u8>>>,
}

impl TaskOutput {
    pub fn new(task: &str, capture: Option<OutputCapture>) -> Self {
        let (out, err) = Route::for_capture(capture);
        Self {
            task: Arc::from(task),
            out,
            err,
            out_buffer: Arc::new(Mutex::new(Vec::new())),
            err_buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Output that goes straight to the process streams.
    pub fn passthrough(task: &str) -> Self {
        Self::new(task, None)
    }

    pub fn is_captured(&self) -> bool {
        self.out != Route::Stdout || self.err != Route::Stderr
    }

    pub fn stdout(&self) -> OutputStream {
        OutputStream {
            task: self.task.clone(),
            route: self.out,
            buffer: self.out_buffer.clone(),
        }
    }

    pub fn stderr(&self) -> OutputStream {
        OutputStream {
            task: self.task.clone(),
            route: self.err,
            buffer: self.err_buffer.clone(),
        }
    }

    fn flush_all(&self) {
        self.stdout().flush_partial();
        self.stderr().flush_partial();
    }
}

/// Active redirection for one task execution. Dropping it flushes whatever
/// partial lines are still buffered.
pub struct OutputRedirect {
    output: TaskOutput,
}

impl OutputRedirect {
    pub fn begin(task: &str, capture: Option<OutputCapture>) -> Self {
        Self {
            output: TaskOutput::new(task, capture),
        }
    }

    pub fn output(&self) -> TaskOutput {
        self.output.clone()
    }
}

impl Drop for OutputRedirect {
    fn drop(&mut self) {
        self.output.flush_all();
    }
}

/// Writer for one of a task's output streams.
pub struct OutputStream {
    task: Arc<str>,
    route: Route,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl OutputStream {
    fn emit(&self, line: &str) {
        match self.route {
            Route::LogInfo => info!(target: "taskchain::output", task = %self.task, "{}", line),
            Route::LogError => error!(target: "taskchain::output", task = %self.task, "{}", line),
            Route::Stdout | Route::Stderr => {}
        }
    }

    fn flush_partial(&self) {
        if matches!(self.route, Route::Stdout | Route::Stderr) {
            return;
        }
        let rest: Vec<u8> = std::mem::take(
            &mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if !rest.is_empty() {
            self.emit(String::from_utf8_lossy(&rest).trim_end_matches('\r'));
        }
    }
}

impl Write for OutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.route {
            Route::Stdout => io::stdout().write(buf),
            Route::Stderr => io::stderr().write(buf),
            Route::LogInfo | Route::LogError => {
                let lines = {
                    let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
                    buffer.extend_from_slice(buf);
                    let mut lines = Vec::new();
                    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=pos).collect();
                        lines.push(
                            String::from_utf8_lossy(&line[..line.len() - 1])
                                .trim_end_matches('\r')
                                .to_string(),
                        );
                    }
                    lines
                };
                for line in lines {
                    self.emit(&line);
                }
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.route {
            Route::Stdout => io::stdout().flush(),
            Route::Stderr => io::stderr().flush(),
            Route::LogInfo | Route::LogError => Ok(()),
        }
    }
}
