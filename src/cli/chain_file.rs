//! Chain definitions stored as TOML files.
//!
//! ```toml
//! name = "release"
//! retries = 2
//!
//! [[tasks]]
//! command = "cargo"
//! args = ["build", "--release"]
//! work = 20
//!
//! [[tasks]]
//! name = "docs"
//! command = "cargo"
//! args = ["doc"]
//! background = true
//!
//! [[tasks]]
//! barrier = true
//!
//! [[tasks]]
//! include = "checks.toml"
//!
//! [[tasks]]
//! lazy = "generated/publish.toml"
//! ```
//!
//! Included files are expanded in place when the chain is initialized. Lazy
//! files are read only when the sequence reaches them, so earlier tasks may
//! generate them.

use crate::cli::command::{CommandSpec, CommandTask};
use crate::engine::{ExecutionContext, TaskChain};
use crate::error::{Result, TaskingError};
use crate::task::{BackgroundTask, TaskDescriptor};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainDefinition {
    pub name: String,
    pub retries: Option<u32>,
    #[serde(default)]
    pub suppress_lifecycle: bool,
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IncludeEntry {
    pub include: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LazyEntry {
    pub lazy: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BarrierEntry {
    pub barrier: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskEntry {
    Include(IncludeEntry),
    Lazy(LazyEntry),
    Barrier(BarrierEntry),
    Command(CommandSpec),
}

impl ChainDefinition {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let definition: ChainDefinition = toml::from_str(content)?;
        if definition.retries == Some(0) {
            return Err(TaskingError::Config(format!(
                "Chain '{}': retries must be at least 1",
                definition.name
            )));
        }
        Ok(definition)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| TaskingError::io(path, e))?;
        Self::from_toml_str(&content)
    }
}

/// A chain read from a file, together with the files that included it.
#[derive(Debug, Clone)]
pub struct FileChain {
    definition: ChainDefinition,
    path: PathBuf,
    stack: Vec<PathBuf>,
}

impl FileChain {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_nested(path.as_ref(), &[])
    }

    fn load_nested(path: &Path, stack: &[PathBuf]) -> Result<Self> {
        let path = path.canonicalize().map_err(|e| TaskingError::io(path, e))?;
        if stack.contains(&path) {
            let cycle: Vec<String> = stack
                .iter()
                .chain(std::iter::once(&path))
                .map(|p| p.display().to_string())
                .collect();
            return Err(TaskingError::Config(format!(
                "Chain files include each other: {}",
                cycle.join(" -> ")
            )));
        }

        let definition = ChainDefinition::from_toml_file(&path)?;
        debug!(chain = %definition.name, path = %path.display(), "Loaded chain file");
        Ok(Self {
            definition,
            path,
            stack: stack.to_vec(),
        })
    }

    pub fn definition(&self) -> &ChainDefinition {
        &self.definition
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_arc(self) -> Arc<dyn TaskChain> {
        Arc::new(self)
    }

    fn base_dir(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn nested_stack(&self) -> Vec<PathBuf> {
        let mut stack = self.stack.clone();
        stack.push(self.path.clone());
        stack
    }
}

impl TaskChain for FileChain {
    fn name(&self) -> String {
        self.definition.name.clone()
    }

    fn retries(&self) -> Option<u32> {
        self.definition.retries
    }

    fn suppress_lifecycle(&self) -> bool {
        self.definition.suppress_lifecycle
    }

    fn init(&self, ctx: &mut ExecutionContext) -> anyhow::Result<()> {
        let base_dir = self.base_dir();
        let mut pending: Vec<Arc<BackgroundTask>> = Vec::new();

        for entry in &self.definition.tasks {
            match entry {
                TaskEntry::Command(spec) => {
                    let task = CommandTask::new(spec.clone(), &base_dir);
                    if spec.background {
                        pending.push(ctx.add_background(task));
                    } else {
                        ctx.add_task(task);
                    }
                }
                TaskEntry::Barrier(BarrierEntry { barrier: true }) => {
                    match BackgroundTask::all_barrier(&pending) {
                        Some(barrier) => {
                            ctx.add_descriptor(TaskDescriptor::Barrier(barrier));
                            pending.clear();
                        }
                        None => {
                            warn!(chain = %self.name(), "Barrier without background tasks, skipping")
                        }
                    }
                }
                TaskEntry::Barrier(BarrierEntry { barrier: false }) => {}
                TaskEntry::Include(IncludeEntry { include }) => {
                    let included =
                        FileChain::load_nested(&base_dir.join(include), &self.nested_stack())?;
                    ctx.add_chain(&included)?;
                }
                TaskEntry::Lazy(LazyEntry { lazy }) => {
                    ctx.add_lazy_chain(Arc::new(LazyFileChain::new(
                        base_dir.join(lazy),
                        self.nested_stack(),
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A chain file that is read when its context is created, not before.
pub struct LazyFileChain {
    path: PathBuf,
    stack: Vec<PathBuf>,
    loaded: Mutex<Option<FileChain>>,
}

impl LazyFileChain {
    pub fn new(path: PathBuf, stack: Vec<PathBuf>) -> Self {
        Self {
            path,
            stack,
            loaded: Mutex::new(None),
        }
    }

    fn loaded<T>(&self, f: impl FnOnce(&FileChain) -> T) -> Option<T> {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(f)
    }
}

impl TaskChain for LazyFileChain {
    fn name(&self) -> String {
        self.loaded(|chain| chain.name()).unwrap_or_else(|| {
            self.path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.path.display().to_string())
        })
    }

    fn retries(&self) -> Option<u32> {
        self.loaded(|chain| chain.retries()).flatten()
    }

    fn suppress_lifecycle(&self) -> bool {
        self.loaded(|chain| chain.suppress_lifecycle())
            .unwrap_or_default()
    }

    fn init(&self, ctx: &mut ExecutionContext) -> anyhow::Result<()> {
        let chain = FileChain::load_nested(&self.path, &self.stack)?;
        chain.init(ctx)?;
        *self.loaded.lock().unwrap_or_else(PoisonError::into_inner) = Some(chain);
        Ok(())
    }
}
