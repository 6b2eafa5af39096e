//! Key-value backend trait definition.

use crate::error::StorageResult;

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite a key.
    Put {
        /// Raw key bytes.
        key: Vec<u8>,
        /// Raw value bytes.
        value: Vec<u8>,
    },
    /// Remove a key. Deleting a missing key is a no-op.
    Delete {
        /// Raw key bytes.
        key: Vec<u8>,
    },
}

impl BatchOp {
    /// Returns the key this operation touches.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// An ordered list of mutations applied all-or-nothing.
///
/// Operations apply in insertion order, so a later operation on the same
/// key wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a put.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.ops.push(BatchOp::Put { key, value });
        self
    }

    /// Appends a delete.
    pub fn delete(&mut self, key: Vec<u8>) -> &mut Self {
        self.ops.push(BatchOp::Delete { key });
        self
    }

    /// Returns the operations in application order.
    #[must_use]
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Consumes the batch, returning its operations.
    #[must_use]
    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }

    /// Returns the number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if the batch holds no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl From<Vec<BatchOp>> for WriteBatch {
    fn from(ops: Vec<BatchOp>) -> Self {
        Self { ops }
    }
}

/// An ordered key-value backend for LakeMeta.
///
/// Backends are **opaque byte stores**. Keys compare in lexicographic byte
/// order. The entity store owns every key layout and payload format.
///
/// # Invariants
///
/// - `get` of a missing key returns `Ok(None)`
/// - `scan_prefix` returns rows in ascending key order
/// - `write_batch` is all-or-nothing: readers observe either none or all of
///   a batch's operations
/// - Persistent backends make a batch durable before `write_batch` returns
/// - After `close`, every operation fails with `StorageError::Closed`
///
/// # Implementors
///
/// - [`super::MemoryKv`] - For testing
/// - [`super::LogKv`] - For persistent storage
pub trait KvBackend: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed or unreadable.
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Returns every row whose key starts with `prefix`, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed or unreadable.
    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Returns the greatest row whose key starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed or unreadable.
    fn last_with_prefix(&self, prefix: &[u8]) -> StorageResult<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(self.scan_prefix(prefix)?.pop())
    }

    /// Applies every operation in `batch` atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be made durable. In that
    /// case none of its operations are visible.
    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()>;

    /// Stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// See [`KvBackend::write_batch`].
    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(key.to_vec(), value.to_vec());
        self.write_batch(batch)
    }

    /// Removes `key`.
    ///
    /// # Errors
    ///
    /// See [`KvBackend::write_batch`].
    fn delete(&self, key: &[u8]) -> StorageResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key.to_vec());
        self.write_batch(batch)
    }

    /// Returns the number of live keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed.
    fn len(&self) -> StorageResult<usize>;

    /// Reclaims space held by overwritten or deleted keys, if the engine
    /// keeps any. The default implementation does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the maintenance pass fails; the logical
    /// contents are unchanged either way.
    fn maintain(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Flushes all pending writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&self) -> StorageResult<()>;

    /// Releases all resources held by the backend. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if final flushing fails.
    fn close(&self) -> StorageResult<()>;

    /// Returns the registry name of this backend.
    fn name(&self) -> &'static str;
}

/// Returns the smallest key strictly greater than every key with `prefix`,
/// or `None` when no such key exists (prefix is all `0xFF`).
#[must_use]
pub(crate) fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xFF {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}
