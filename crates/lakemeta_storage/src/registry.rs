//! Named backend factories.

use crate::backend::KvBackend;
use crate::error::{StorageError, StorageResult};
use crate::log::{LogKv, LogKvOptions};
use crate::memory::MemoryKv;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Settings handed to a backend factory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendOptions {
    /// Root directory for persistent backends.
    pub path: Option<PathBuf>,
    /// Whether persistent backends sync every batch.
    pub sync_on_commit: bool,
    /// Compaction threshold override for engines that compact.
    pub compact_threshold: Option<u64>,
}

impl BackendOptions {
    /// Creates options rooted at `path`.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            sync_on_commit: true,
            compact_threshold: None,
        }
    }
}

/// Constructs a backend from options.
pub type BackendFactory = fn(&BackendOptions) -> StorageResult<Arc<dyn KvBackend>>;

/// Maps provider names to backend factories.
///
/// `BackendRegistry::new()` registers the built-in `"memory"` and `"log"`
/// providers. Embedders may register further providers before opening a
/// store.
///
/// # Example
///
/// ```rust
/// use lakemeta_storage::{BackendOptions, BackendRegistry};
///
/// let registry = BackendRegistry::new();
/// let kv = registry.create("memory", &BackendOptions::default()).unwrap();
/// assert_eq!(kv.name(), "memory");
/// ```
#[derive(Clone)]
pub struct BackendRegistry {
    factories: BTreeMap<String, BackendFactory>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendRegistry {
    /// Creates a registry with the built-in providers.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("memory", open_memory);
        registry.register("log", open_log);
        registry
    }

    /// Creates a registry with no providers.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registers `factory` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, factory: BackendFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Returns true if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Returns the registered provider names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Opens the backend registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownBackend` if no provider has that name, or the
    /// factory's own error.
    pub fn create(&self, name: &str, options: &BackendOptions) -> StorageResult<Arc<dyn KvBackend>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| StorageError::UnknownBackend {
                name: name.to_string(),
            })?;
        factory(options)
    }
}

fn open_memory(_options: &BackendOptions) -> StorageResult<Arc<dyn KvBackend>> {
    Ok(Arc::new(MemoryKv::new()))
}

fn open_log(options: &BackendOptions) -> StorageResult<Arc<dyn KvBackend>> {
    let path = options
        .path
        .clone()
        .ok_or_else(|| StorageError::InvalidOptions("log backend requires a path".into()))?;

    let mut log_options = LogKvOptions::new(path).sync_on_commit(options.sync_on_commit);
    if let Some(threshold) = options.compact_threshold {
        log_options = log_options.compact_threshold(threshold);
    }
    Ok(Arc::new(LogKv::open(log_options)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn builtin_providers_are_registered() {
        let registry = BackendRegistry::new();
        assert_eq!(registry.names(), vec!["log", "memory"]);
        assert!(registry.contains("memory"));
    }

    #[test]
    fn unknown_provider_fails() {
        let registry = BackendRegistry::new();
        let result = registry.create("rocksdb", &BackendOptions::default());
        assert!(matches!(
            result,
            Err(StorageError::UnknownBackend { ref name }) if name == "rocksdb"
        ));
    }

    #[test]
    fn log_provider_requires_path() {
        let registry = BackendRegistry::new();
        let result = registry.create("log", &BackendOptions::default());
        assert!(matches!(result, Err(StorageError::InvalidOptions(_))));
    }

    #[test]
    fn log_provider_opens_at_path() {
        let dir = tempdir().unwrap();
        let registry = BackendRegistry::new();
        let kv = registry
            .create("log", &BackendOptions::at(dir.path().join("store")))
            .unwrap();
        kv.put(b"k", b"v").unwrap();
        assert_eq!(kv.name(), "log");
        assert!(dir.path().join("store").join("kv.log").exists());
    }

    #[test]
    fn custom_provider_can_be_registered() {
        fn always_memory(_: &BackendOptions) -> StorageResult<Arc<dyn KvBackend>> {
            Ok(Arc::new(MemoryKv::new()))
        }

        let mut registry = BackendRegistry::empty();
        assert!(registry.create("memory", &BackendOptions::default()).is_err());
        registry.register("scratch", always_memory);
        assert!(registry.create("scratch", &BackendOptions::default()).is_ok());
    }
}
