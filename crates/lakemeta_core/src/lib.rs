//! # LakeMeta Core
//!
//! Versioned, namespace-hierarchical entity store for the LakeMeta
//! metadata catalog.
//!
//! Entities form a fixed hierarchy:
//!
//! ```text
//! metalake
//! └── catalog
//!     └── schema
//!         ├── table
//!         └── fileset
//! ```
//!
//! This crate provides:
//! - Identifiers (`m1.c1.s1.t1`) and stable generated entity ids
//! - Create, load, list, alter, rename and drop with parent checks
//! - Multi-version storage with tombstones and rename markers
//! - Garbage collection of versions past the retention window
//! - Hierarchical locking: writes to one identifier serialize, writes to
//!   disjoint identifiers run in parallel
//!
//! Storage is delegated to any [`lakemeta_storage::KvBackend`]; payloads
//! are encoded with [`lakemeta_codec`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod entity;
mod error;
mod gc;
mod id;
mod ident;
pub mod key;
mod lock;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    Config, IdStrategy, KEY_BACKEND, KEY_DELETE_AFTER_MS, KEY_GC_INTERVAL_MS, KEY_ID_GENERATOR,
    KEY_LOCK_TIMEOUT_MS, KEY_MAX_SKEW_MS, KEY_PATH, KEY_SERDE, KEY_SYNC_ON_COMMIT,
};
pub use entity::{
    AuditInfo, CatalogType, Column, Entity, EntityChange, EntityKind, EntitySerDe, EntityType,
    FilesetType, FramedSerDe, NewEntity, BACKUP_STORAGE_LOCATION_PREFIX, OWNER_PROPERTY,
};
pub use error::{StoreError, StoreResult};
pub use gc::{GarbageCollector, GcHandle, GcStats};
pub use id::{EntityId, IdGenerator, RandomIdGenerator, SequentialIdGenerator, MAX_ID};
pub use ident::{NameIdentifier, Namespace, StringIdentifier, ID_PROPERTY_KEY, RESERVED_CHARS};
pub use key::VersionStamp;
pub use lock::{LockPath, TreeLockGuard, TreeLockManager};
pub use store::{EntityStore, VersionInfo, VersionState, LOCATION_PROPERTY};

pub use lakemeta_codec::Format;
