//! Store configuration.

use crate::error::{StoreError, StoreResult};
use lakemeta_codec::Format;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Property key selecting the backend provider.
pub const KEY_BACKEND: &str = "lakemeta.entity.store.kv";
/// Property key for the backend root directory.
pub const KEY_PATH: &str = "lakemeta.entity.store.kv.path";
/// Property key selecting the payload format for new writes.
pub const KEY_SERDE: &str = "lakemeta.entity.serde";
/// Property key for the tolerated clock skew, in milliseconds.
pub const KEY_MAX_SKEW_MS: &str = "lakemeta.entity.store.maxTransactionSkewTimeMs";
/// Property key for the retention window, in milliseconds.
pub const KEY_DELETE_AFTER_MS: &str = "lakemeta.entity.store.deleteAfterTimeMs";
/// Property key for the GC interval in milliseconds; 0 disables GC.
pub const KEY_GC_INTERVAL_MS: &str = "lakemeta.entity.store.gcIntervalMs";
/// Property key for the lock acquisition timeout, in milliseconds.
pub const KEY_LOCK_TIMEOUT_MS: &str = "lakemeta.entity.store.lockTimeoutMs";
/// Property key selecting the id generator.
pub const KEY_ID_GENERATOR: &str = "lakemeta.entity.store.idGenerator";
/// Property key controlling per-commit fsync.
pub const KEY_SYNC_ON_COMMIT: &str = "lakemeta.entity.store.syncOnCommit";

/// How new entity ids are chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdStrategy {
    /// Random 63-bit ids.
    #[default]
    Random,
    /// A counter seeded from the highest id in the store.
    Sequential,
}

/// Configuration for opening an entity store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Backend provider name in the backend registry.
    pub backend: String,

    /// Root directory of a persistent backend.
    pub path: Option<PathBuf>,

    /// Payload format for new writes. Every format is readable.
    pub serde_format: Format,

    /// How far version timestamps may lag behind across writers.
    pub max_skew_time: Duration,

    /// How long superseded and dropped versions are kept.
    pub delete_after: Duration,

    /// Interval between background GC passes. `None` disables the task.
    pub gc_interval: Option<Duration>,

    /// How long a mutation waits for its locks.
    pub lock_timeout: Duration,

    /// Whether the backend syncs every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Id generation strategy.
    pub id_strategy: IdStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: "log".to_string(),
            path: None,
            serde_format: Format::Cbor,
            max_skew_time: Duration::from_secs(1),
            delete_after: Duration::from_secs(20 * 60),
            gc_interval: Some(Duration::from_secs(10 * 60)),
            lock_timeout: Duration::from_secs(10),
            sync_on_commit: true,
            id_strategy: IdStrategy::Random,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for an in-memory store without background GC.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default().backend("memory").gc_interval(None)
    }

    /// Sets the backend provider.
    #[must_use]
    pub fn backend(mut self, name: impl Into<String>) -> Self {
        self.backend = name.into();
        self
    }

    /// Sets the backend root directory.
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the payload format for new writes.
    #[must_use]
    pub const fn serde_format(mut self, format: Format) -> Self {
        self.serde_format = format;
        self
    }

    /// Sets the tolerated clock skew.
    #[must_use]
    pub const fn max_skew_time(mut self, skew: Duration) -> Self {
        self.max_skew_time = skew;
        self
    }

    /// Sets the retention window.
    #[must_use]
    pub const fn delete_after(mut self, retention: Duration) -> Self {
        self.delete_after = retention;
        self
    }

    /// Sets the GC interval.
    #[must_use]
    pub const fn gc_interval(mut self, interval: Option<Duration>) -> Self {
        self.gc_interval = interval;
        self
    }

    /// Sets the lock timeout.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets whether every commit is synced.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the id generation strategy.
    #[must_use]
    pub const fn id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    /// How long a version must have been superseded before GC removes it.
    #[must_use]
    pub fn retention(&self) -> Duration {
        self.delete_after.saturating_add(self.max_skew_time)
    }

    /// Builds a configuration from flat `lakemeta.entity.*` properties.
    ///
    /// Absent keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a malformed value.
    pub fn from_properties(properties: &HashMap<String, String>) -> StoreResult<Self> {
        let mut config = Self::default();

        if let Some(backend) = properties.get(KEY_BACKEND) {
            config.backend = backend.trim().to_string();
        }
        if let Some(path) = properties.get(KEY_PATH) {
            config.path = Some(PathBuf::from(path.trim()));
        }
        if let Some(format) = properties.get(KEY_SERDE) {
            config.serde_format = format
                .parse()
                .map_err(|e| StoreError::invalid_argument(format!("{KEY_SERDE}: {e}")))?;
        }
        if let Some(ms) = parse_millis(properties, KEY_MAX_SKEW_MS)? {
            config.max_skew_time = ms;
        }
        if let Some(ms) = parse_millis(properties, KEY_DELETE_AFTER_MS)? {
            config.delete_after = ms;
        }
        if let Some(ms) = parse_millis(properties, KEY_GC_INTERVAL_MS)? {
            config.gc_interval = (!ms.is_zero()).then_some(ms);
        }
        if let Some(ms) = parse_millis(properties, KEY_LOCK_TIMEOUT_MS)? {
            config.lock_timeout = ms;
        }
        if let Some(strategy) = properties.get(KEY_ID_GENERATOR) {
            config.id_strategy = match strategy.trim().to_ascii_lowercase().as_str() {
                "random" => IdStrategy::Random,
                "sequential" => IdStrategy::Sequential,
                other => {
                    return Err(StoreError::invalid_argument(format!(
                        "{KEY_ID_GENERATOR}: unknown strategy '{other}'"
                    )))
                }
            };
        }
        if let Some(sync) = properties.get(KEY_SYNC_ON_COMMIT) {
            config.sync_on_commit = sync.trim().parse().map_err(|_| {
                StoreError::invalid_argument(format!("{KEY_SYNC_ON_COMMIT}: expected true or false"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks that the settings are consistent.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the retention window is shorter than
    /// the skew window, the backend name is empty, or the log backend has
    /// no path.
    pub fn validate(&self) -> StoreResult<()> {
        if self.backend.is_empty() {
            return Err(StoreError::invalid_argument("backend name cannot be empty"));
        }
        if self.backend == "log" && self.path.is_none() {
            return Err(StoreError::invalid_argument(format!(
                "backend '{}' requires a path",
                self.backend
            )));
        }
        self.validate_windows()
    }

    /// Checks the timing settings only.
    pub(crate) fn validate_windows(&self) -> StoreResult<()> {
        if self.delete_after < self.max_skew_time {
            return Err(StoreError::invalid_argument(format!(
                "delete_after ({:?}) must be at least max_skew_time ({:?})",
                self.delete_after, self.max_skew_time
            )));
        }
        if self.gc_interval.is_some_and(|i| i.is_zero()) {
            return Err(StoreError::invalid_argument("gc_interval must be positive"));
        }
        Ok(())
    }
}

fn parse_millis(properties: &HashMap<String, String>, key: &str) -> StoreResult<Option<Duration>> {
    properties
        .get(key)
        .map(|value| {
            value
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| StoreError::invalid_argument(format!("{key}: '{value}' is not a number of milliseconds")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.backend, "log");
        assert_eq!(config.max_skew_time, Duration::from_secs(1));
        assert_eq!(config.delete_after, Duration::from_secs(1200));
        assert_eq!(config.gc_interval, Some(Duration::from_secs(600)));
        assert!(config.sync_on_commit);
        assert_eq!(config.retention(), Duration::from_secs(1201));
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .backend("memory")
            .sync_on_commit(false)
            .max_skew_time(Duration::from_millis(10))
            .id_strategy(IdStrategy::Sequential);

        assert_eq!(config.backend, "memory");
        assert!(!config.sync_on_commit);
        assert_eq!(config.id_strategy, IdStrategy::Sequential);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn from_properties_reads_every_key() {
        let config = Config::from_properties(&props(&[
            (KEY_BACKEND, "log"),
            (KEY_PATH, "/tmp/lakemeta"),
            (KEY_SERDE, "json"),
            (KEY_MAX_SKEW_MS, "1000"),
            (KEY_DELETE_AFTER_MS, "1200000"),
            (KEY_GC_INTERVAL_MS, "0"),
            (KEY_LOCK_TIMEOUT_MS, "250"),
            (KEY_ID_GENERATOR, "sequential"),
            (KEY_SYNC_ON_COMMIT, "false"),
        ]))
        .unwrap();

        assert_eq!(config.path, Some(PathBuf::from("/tmp/lakemeta")));
        assert_eq!(config.serde_format, Format::Json);
        assert_eq!(config.delete_after, Duration::from_secs(1200));
        assert_eq!(config.gc_interval, None);
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.id_strategy, IdStrategy::Sequential);
        assert!(!config.sync_on_commit);
    }

    #[test]
    fn from_properties_rejects_malformed_values() {
        for bad in [
            props(&[(KEY_BACKEND, "memory"), (KEY_MAX_SKEW_MS, "soon")]),
            props(&[(KEY_BACKEND, "memory"), (KEY_SERDE, "proto")]),
            props(&[(KEY_BACKEND, "memory"), (KEY_ID_GENERATOR, "snowflake")]),
            props(&[(KEY_BACKEND, "memory"), (KEY_SYNC_ON_COMMIT, "yes")]),
        ] {
            assert!(matches!(
                Config::from_properties(&bad),
                Err(StoreError::InvalidArgument { .. })
            ));
        }
    }

    #[test]
    fn validate_rules() {
        assert!(Config::default().validate().is_err());
        assert!(Config::default().path("/tmp/x").validate().is_ok());
        assert!(Config::in_memory()
            .delete_after(Duration::from_millis(10))
            .validate()
            .is_err());
        assert!(Config::in_memory()
            .gc_interval(Some(Duration::ZERO))
            .validate()
            .is_err());
    }
}
