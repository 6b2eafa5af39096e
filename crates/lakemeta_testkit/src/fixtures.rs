//! Test fixtures and store helpers.
//!
//! Provides stores with a controllable clock and helpers for building the
//! usual metalake / catalog / schema tree.

use lakemeta_core::{
    CatalogType, Config, EntityStore, EntityType, FramedSerDe, ManualClock, NameIdentifier,
    NewEntity, StoreResult,
};
use lakemeta_storage::{KvBackend, LogKv, LogKvOptions, MemoryKv};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Wall-clock start of every test clock: 2024-01-01T00:00:00Z.
pub const TEST_EPOCH_MS: u64 = 1_704_067_200_000;

/// A store with a manual clock and automatic cleanup.
///
/// Background GC is disabled; tests drive collection explicitly.
pub struct TestStore {
    /// The store.
    pub store: EntityStore,
    /// The clock every version stamp is taken from.
    pub clock: Arc<ManualClock>,
    config: Config,
    temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Default configuration used by fixtures.
    pub fn config() -> Config {
        Config::in_memory()
            .lock_timeout(Duration::from_secs(5))
            .sync_on_commit(false)
    }

    /// Creates an in-memory store.
    pub fn memory() -> Self {
        Self::memory_with(Self::config())
    }

    /// Creates an in-memory store with a custom configuration.
    pub fn memory_with(config: Config) -> Self {
        let clock = Arc::new(ManualClock::new(TEST_EPOCH_MS));
        let store = assemble(Arc::new(MemoryKv::new()), clock.clone(), config.clone())
            .expect("Failed to open in-memory store");
        Self {
            store,
            clock,
            config,
            temp_dir: None,
        }
    }

    /// Creates a store on the log backend in a fresh temporary directory.
    pub fn log() -> Self {
        Self::log_with(Self::config())
    }

    /// Creates a log-backed store with a custom configuration.
    pub fn log_with(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let clock = Arc::new(ManualClock::new(TEST_EPOCH_MS));
        let store = open_log(temp_dir.path(), clock.clone(), config.clone())
            .expect("Failed to open log store");
        Self {
            store,
            clock,
            config,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the data directory of a log-backed store.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().to_path_buf())
    }

    /// Closes the store and opens it again on the same directory and clock.
    ///
    /// Panics for an in-memory store.
    pub fn reopen(self) -> Self {
        let Self {
            store,
            clock,
            config,
            temp_dir,
        } = self;
        store.close().expect("Failed to close store");
        drop(store);

        let dir = temp_dir.expect("Only log-backed stores can be reopened");
        let store =
            open_log(dir.path(), clock.clone(), config.clone()).expect("Failed to reopen store");
        Self {
            store,
            clock,
            config,
            temp_dir: Some(dir),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Creates `m1`, `m1.c1` and `m1.c1.s1`.
    pub fn seed_schema(&self) -> StoreResult<()> {
        seed_schema(&self.store, "m1", "c1", "s1")
    }
}

impl std::ops::Deref for TestStore {
    type Target = EntityStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

fn assemble(
    backend: Arc<dyn KvBackend>,
    clock: Arc<ManualClock>,
    config: Config,
) -> StoreResult<EntityStore> {
    let id_gen = EntityStore::id_generator(config.id_strategy, backend.as_ref())?;
    EntityStore::with_parts(
        backend,
        Arc::new(FramedSerDe::new(config.serde_format)),
        id_gen,
        clock,
        config,
    )
}

fn open_log(dir: &Path, clock: Arc<ManualClock>, config: Config) -> StoreResult<EntityStore> {
    let backend = LogKv::open(LogKvOptions::new(dir).sync_on_commit(config.sync_on_commit))?;
    assemble(Arc::new(backend), clock, config)
}

/// Parses an identifier, panicking on bad input.
pub fn ident(text: &str) -> NameIdentifier {
    NameIdentifier::parse(text).expect("Invalid identifier in test")
}

/// Creates a metalake, a fileset catalog and a schema.
pub fn seed_schema(store: &EntityStore, metalake: &str, catalog: &str, schema: &str) -> StoreResult<()> {
    let m = ident(metalake);
    let c = ident(&format!("{metalake}.{catalog}"));
    let s = ident(&format!("{metalake}.{catalog}.{schema}"));
    if !store.exists(&m, EntityType::Metalake)? {
        store.create(&m, NewEntity::metalake())?;
    }
    if !store.exists(&c, EntityType::Catalog)? {
        store.create(&c, NewEntity::catalog(CatalogType::Fileset, "hadoop"))?;
    }
    store.create(&s, NewEntity::schema())?;
    Ok(())
}
