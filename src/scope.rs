//! Hierarchical lookup scope used to hand parameters to tasks.
//!
//! Every engine, chain context and task owns a [`Scope`]. Lookups fall back to
//! the parent chain, writes always land in the scope's own layer, so a child
//! never mutates what its parent or siblings see.

use crate::error::{Result, TaskingError};
use dashmap::DashMap;
use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum ScopeKey {
    Type(TypeId),
    Name(String),
}

type ScopeValue = Arc<dyn Any + Send + Sync>;

struct ScopeInner {
    name: String,
    parent: Option<Scope>,
    values: DashMap<ScopeKey, ScopeValue>,
}

/// A node in the scope tree. Cloning yields another handle to the same node.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// Create a scope without parent
    pub fn root(name: impl Into<String>) -> Self {
        Self::with_parent(name, None)
    }

    fn with_parent(name: impl Into<String>, parent: Option<Scope>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                name: name.into(),
                parent,
                values: DashMap::new(),
            }),
        }
    }

    /// Create a child with its own private write layer
    pub fn create_child(&self, name: impl Into<String>) -> Scope {
        Self::with_parent(name, Some(self.clone()))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.inner.parent.as_ref()
    }

    /// Names from the root down to this scope, joined with `/`.
    pub fn path(&self) -> String {
        match self.parent() {
            Some(parent) => format!("{}/{}", parent.path(), self.name()),
            None => self.name().to_string(),
        }
    }

    /// Store a value keyed by its type.
    pub fn set<T: Any + Send + Sync>(&self, value: T) {
        self.set_arc(Arc::new(value));
    }

    pub fn set_arc<T: Any + Send + Sync>(&self, value: Arc<T>) {
        self.inner
            .values
            .insert(ScopeKey::Type(TypeId::of::<T>()), value);
    }

    /// Store a value under an explicit name.
    pub fn set_named<T: Any + Send + Sync>(&self, name: impl Into<String>, value: T) {
        self.set_named_arc(name, Arc::new(value));
    }

    pub fn set_named_arc<T: Any + Send + Sync>(&self, name: impl Into<String>, value: Arc<T>) {
        self.inner.values.insert(ScopeKey::Name(name.into()), value);
    }

    pub fn remove<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.inner
            .values
            .remove(&ScopeKey::Type(TypeId::of::<T>()))
            .and_then(|(_, value)| value.downcast::<T>().ok())
    }

    /// Type lookup in this scope only.
    pub fn get_local<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.lookup_local(&ScopeKey::Type(TypeId::of::<T>()))
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Type lookup through the scope hierarchy.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.lookup(&ScopeKey::Type(TypeId::of::<T>()))
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Like [`Scope::get`], but reports a missing value as an error.
    pub fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        self.get::<T>().ok_or_else(|| TaskingError::NotFound {
            key: type_name::<T>().to_string(),
            scope: self.path(),
        })
    }

    pub fn get_named<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.resolve_named::<T>(name).ok()
    }

    /// Named lookup through the hierarchy. The nearest value with this name
    /// wins; if it has another type the lookup fails instead of searching on.
    pub fn resolve_named<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let value = self
            .lookup(&ScopeKey::Name(name.to_string()))
            .ok_or_else(|| TaskingError::NotFound {
                key: name.to_string(),
                scope: self.path(),
            })?;

        value
            .downcast::<T>()
            .map_err(|_| TaskingError::TypeMismatch {
                key: name.to_string(),
                scope: self.path(),
                expected: type_name::<T>(),
            })
    }

    fn lookup_local(&self, key: &ScopeKey) -> Option<ScopeValue> {
        self.inner.values.get(key).map(|entry| entry.value().clone())
    }

    fn lookup(&self, key: &ScopeKey) -> Option<ScopeValue> {
        let mut current = Some(self);
        while let Some(scope) = current {
            if let Some(value) = scope.lookup_local(key) {
                return Some(value);
            }
            current = scope.parent();
        }
        None
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("path", &self.path())
            .field("values", &self.inner.values.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct BuildVersion(String);

    #[test]
    fn test_child_reads_parent_values() {
        let root = Scope::root("engine");
        root.set(BuildVersion("1.0.0".to_string()));
        root.set_named("workspace", "/tmp/ws".to_string());

        let child = root.create_child("chain").create_child("task");
        assert_eq!(child.resolve::<BuildVersion>().unwrap().0, "1.0.0");
        assert_eq!(
            child.resolve_named::<String>("workspace").unwrap().as_str(),
            "/tmp/ws"
        );
        assert_eq!(child.path(), "engine/chain/task");
    }

    #[test]
    fn test_child_writes_stay_private() {
        let root = Scope::root("engine");
        root.set(BuildVersion("1.0.0".to_string()));

        let first = root.create_child("first");
        let second = root.create_child("second");
        first.set(BuildVersion("2.0.0".to_string()));

        assert_eq!(first.resolve::<BuildVersion>().unwrap().0, "2.0.0");
        assert_eq!(second.resolve::<BuildVersion>().unwrap().0, "1.0.0");
        assert_eq!(root.resolve::<BuildVersion>().unwrap().0, "1.0.0");
        assert!(second.get_local::<BuildVersion>().is_none());
    }

    #[test]
    fn test_missing_and_mismatched_values() {
        let root = Scope::root("engine");
        root.set_named("retries", 3u32);

        let missing = root.resolve::<BuildVersion>().unwrap_err();
        assert!(matches!(missing, TaskingError::NotFound { .. }));

        let mismatch = root.resolve_named::<String>("retries").unwrap_err();
        assert!(matches!(mismatch, TaskingError::TypeMismatch { .. }));
        assert_eq!(*root.resolve_named::<u32>("retries").unwrap(), 3);
    }

    #[test]
    fn test_remove_only_affects_local_layer() {
        let root = Scope::root("engine");
        root.set(7u64);
        let child = root.create_child("task");
        child.set(9u64);

        assert_eq!(*child.remove::<u64>().unwrap(), 9);
        assert_eq!(*child.resolve::<u64>().unwrap(), 7);
    }
}
