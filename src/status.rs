//! Execution status model.
//!
//! A [`Status`] carries a [`Severity`], a message, an optional cause and any
//! number of child statuses. Multi statuses aggregate the statuses of all
//! executed tasks; their severity is always the maximum of their children.

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// Ordered severity of a status.
///
/// `Error` and `Cancel` both halt the processing of a task sequence.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Ok,
    Info,
    Warning,
    Error,
    Cancel,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Ok => "OK",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Cancel => "CANCEL",
        }
    }

    /// Whether a status of this severity stops the remaining tasks of a context.
    pub fn is_halting(&self) -> bool {
        *self >= Severity::Error
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of executing a task, a chain or a whole context.
#[derive(Serialize, Clone, Debug)]
pub struct Status {
    severity: Severity,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<Status>,
    #[serde(
        serialize_with = "serialize_cause",
        skip_serializing_if = "Option::is_none"
    )]
    cause: Option<Arc<anyhow::Error>>,
}

fn serialize_cause<S: Serializer>(
    cause: &Option<Arc<anyhow::Error>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match cause {
        Some(err) => serializer.serialize_str(&format!("{:#}", err)),
        None => serializer.serialize_none(),
    }
}

impl Status {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            children: Vec::new(),
            cause: None,
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(Severity::Ok, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn cancel(message: impl Into<String>) -> Self {
        Self::new(Severity::Cancel, message)
    }

    /// Creates an empty aggregate status. Its severity follows its children.
    pub fn multi(message: impl Into<String>) -> Self {
        Self::ok(message)
    }

    /// Attaches the error that caused this status.
    pub fn with_cause(mut self, cause: anyhow::Error) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn with_shared_cause(mut self, cause: Arc<anyhow::Error>) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Appends a child, raising this status' severity to the child's if higher.
    pub fn add(&mut self, child: Status) {
        if child.severity > self.severity {
            self.severity = child.severity;
        }
        self.children.push(child);
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn children(&self) -> &[Status] {
        &self.children
    }

    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.cause.as_deref()
    }

    pub fn is_ok(&self) -> bool {
        self.severity == Severity::Ok
    }

    pub fn is_halting(&self) -> bool {
        self.severity.is_halting()
    }

    /// Renders this status and all children as an indented tree.
    pub fn to_tree_string(&self) -> String {
        let mut out = String::new();
        self.write_tree(&mut out, 0);
        out
    }

    fn write_tree(&self, out: &mut String, depth: usize) {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&self.to_string());
        out.push('\n');
        for child in &self.children {
            child.write_tree(out, depth + 1);
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::ok("OK")
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " ({:#})", cause)?;
        }
        Ok(())
    }
}
