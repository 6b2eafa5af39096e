//! # LakeMeta Storage
//!
//! Ordered key-value backends for the LakeMeta entity store.
//!
//! Backends are **opaque byte stores**: keys and values are raw bytes and
//! keys sort in lexicographic byte order. The entity store owns every key
//! layout and payload format; backends only promise ordering, atomic
//! batches and (for persistent engines) durability.
//!
//! ## Design Principles
//!
//! - Point reads, prefix scans and all-or-nothing batch writes
//! - A missing key is `Ok(None)`, never an error
//! - Must be `Send + Sync` for concurrent access
//! - Persistent engines survive restart without losing an acknowledged batch
//!
//! ## Available Backends
//!
//! - [`MemoryKv`] - For testing and ephemeral stores
//! - [`LogKv`] - Durable single-node engine backed by an append-only log
//!
//! ## Example
//!
//! ```rust
//! use lakemeta_storage::{KvBackend, MemoryKv, WriteBatch};
//!
//! let kv = MemoryKv::new();
//! let mut batch = WriteBatch::new();
//! batch.put(b"a/1".to_vec(), b"one".to_vec());
//! batch.put(b"a/2".to_vec(), b"two".to_vec());
//! kv.write_batch(batch).unwrap();
//!
//! let rows = kv.scan_prefix(b"a/").unwrap();
//! assert_eq!(rows.len(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod log;
mod memory;
mod record;
mod registry;

pub use backend::{BatchOp, KvBackend, WriteBatch};
pub use error::{StorageError, StorageResult};
pub use log::{LogKv, LogKvOptions};
pub use memory::MemoryKv;
pub use record::compute_crc32;
pub use registry::{BackendFactory, BackendOptions, BackendRegistry};
