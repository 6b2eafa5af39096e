//! In-memory key-value backend for testing.

use crate::backend::{prefix_successor, BatchOp, KvBackend, WriteBatch};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory ordered key-value backend.
///
/// This backend keeps every row in a `BTreeMap` and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral stores that don't need persistence
///
/// # Thread Safety
///
/// Batches apply under a single write lock, so readers never observe a
/// partially applied batch.
///
/// # Example
///
/// ```rust
/// use lakemeta_storage::{KvBackend, MemoryKv};
///
/// let kv = MemoryKv::new();
/// kv.put(b"key", b"value").unwrap();
/// assert_eq!(kv.get(b"key").unwrap(), Some(b"value".to_vec()));
/// assert_eq!(kv.get(b"missing").unwrap(), None);
/// ```
#[derive(Debug, Default)]
pub struct MemoryKv {
    rows: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    closed: AtomicBool,
}

impl MemoryKv {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend with pre-existing rows.
    ///
    /// Useful for testing recovery and garbage collection scenarios.
    #[must_use]
    pub fn with_rows(rows: BTreeMap<Vec<u8>, Vec<u8>>) -> Self {
        Self {
            rows: RwLock::new(rows),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns a copy of every row.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        self.rows.read().clone()
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

/// Applies `ops` to `rows` in order.
pub(crate) fn apply_ops(rows: &mut BTreeMap<Vec<u8>, Vec<u8>>, ops: Vec<BatchOp>) {
    for op in ops {
        match op {
            BatchOp::Put { key, value } => {
                rows.insert(key, value);
            }
            BatchOp::Delete { key } => {
                rows.remove(&key);
            }
        }
    }
}

/// Iterates the rows of `rows` that start with `prefix`.
pub(crate) fn prefix_range<'a>(
    rows: &'a BTreeMap<Vec<u8>, Vec<u8>>,
    prefix: &[u8],
) -> impl DoubleEndedIterator<Item = (&'a Vec<u8>, &'a Vec<u8>)> {
    let upper = match prefix_successor(prefix) {
        Some(end) => Bound::Excluded(end),
        None => Bound::Unbounded,
    };
    rows.range((Bound::Included(prefix.to_vec()), upper))
}

impl KvBackend for MemoryKv {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.rows.read().get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.ensure_open()?;
        let rows = self.rows.read();
        Ok(prefix_range(&rows, prefix)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn last_with_prefix(&self, prefix: &[u8]) -> StorageResult<Option<(Vec<u8>, Vec<u8>)>> {
        self.ensure_open()?;
        let rows = self.rows.read();
        let last = prefix_range(&rows, prefix)
            .next_back()
            .map(|(k, v)| (k.clone(), v.clone()));
        Ok(last)
    }

    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        self.ensure_open()?;
        let mut rows = self.rows.write();
        apply_ops(&mut rows, batch.into_ops());
        Ok(())
    }

    fn len(&self) -> StorageResult<usize> {
        self.ensure_open()?;
        Ok(self.rows.read().len())
    }

    fn flush(&self) -> StorageResult<()> {
        // In-memory backend has no pending writes
        self.ensure_open()
    }

    fn close(&self) -> StorageResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn memory_new_is_empty() {
        let kv = MemoryKv::new();
        assert_eq!(kv.len().unwrap(), 0);
        assert!(kv.snapshot().is_empty());
    }

    #[test]
    fn memory_get_missing_is_none() {
        let kv = MemoryKv::new();
        assert_eq!(kv.get(b"nope").unwrap(), None);
    }

    #[test]
    fn memory_put_overwrites() {
        let kv = MemoryKv::new();
        kv.put(b"k", b"v1").unwrap();
        kv.put(b"k", b"v2").unwrap();
        assert_eq!(kv.get(b"k").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(kv.len().unwrap(), 1);
    }

    #[test]
    fn memory_delete_missing_is_noop() {
        let kv = MemoryKv::new();
        kv.delete(b"k").unwrap();
        assert_eq!(kv.len().unwrap(), 0);
    }

    #[test]
    fn memory_scan_prefix_is_ordered_and_bounded() {
        let kv = MemoryKv::new();
        let mut batch = WriteBatch::new();
        batch
            .put(b"b/2".to_vec(), b"2".to_vec())
            .put(b"a/9".to_vec(), b"x".to_vec())
            .put(b"b/1".to_vec(), b"1".to_vec())
            .put(b"b0".to_vec(), b"y".to_vec())
            .put(b"c".to_vec(), b"z".to_vec());
        kv.write_batch(batch).unwrap();

        let rows = kv.scan_prefix(b"b/").unwrap();
        let keys: Vec<_> = rows.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![b"b/1".as_slice(), b"b/2".as_slice()]);
    }

    #[test]
    fn memory_scan_prefix_with_ff_bytes() {
        let kv = MemoryKv::new();
        kv.put(&[0xFF, 0xFF, 0x01], b"a").unwrap();
        kv.put(&[0xFF, 0xFF], b"b").unwrap();
        kv.put(&[0xFF, 0xFE], b"c").unwrap();

        let rows = kv.scan_prefix(&[0xFF, 0xFF]).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn memory_last_with_prefix() {
        let kv = MemoryKv::new();
        kv.put(b"v/1", b"one").unwrap();
        kv.put(b"v/3", b"three").unwrap();
        kv.put(b"w/0", b"other").unwrap();

        let (key, value) = kv.last_with_prefix(b"v/").unwrap().unwrap();
        assert_eq!(key, b"v/3");
        assert_eq!(value, b"three");
        assert!(kv.last_with_prefix(b"x/").unwrap().is_none());
    }

    #[test]
    fn memory_batch_applies_in_order() {
        let kv = MemoryKv::new();
        let mut batch = WriteBatch::new();
        batch
            .put(b"k".to_vec(), b"v".to_vec())
            .delete(b"k".to_vec())
            .put(b"j".to_vec(), b"w".to_vec());
        kv.write_batch(batch).unwrap();

        assert_eq!(kv.get(b"k").unwrap(), None);
        assert_eq!(kv.get(b"j").unwrap(), Some(b"w".to_vec()));
    }

    #[test]
    fn memory_closed_rejects_operations() {
        let kv = MemoryKv::new();
        kv.close().unwrap();
        kv.close().unwrap();

        assert!(matches!(kv.get(b"k"), Err(StorageError::Closed)));
        assert!(matches!(kv.put(b"k", b"v"), Err(StorageError::Closed)));
    }

    #[test]
    fn memory_with_rows() {
        let mut rows = BTreeMap::new();
        rows.insert(b"pre".to_vec(), b"loaded".to_vec());
        let kv = MemoryKv::with_rows(rows);
        assert_eq!(kv.get(b"pre").unwrap(), Some(b"loaded".to_vec()));
    }

    fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(prop_oneof![Just(0x00u8), Just(0x01), Just(0xFE), Just(0xFF)], 0..5)
    }

    proptest! {
        #[test]
        fn scan_prefix_matches_filtered_model(
            rows in prop::collection::btree_map(key_strategy(), any::<u8>().prop_map(|b| vec![b]), 0..24),
            prefix in key_strategy(),
        ) {
            let kv = MemoryKv::with_rows(rows.clone());
            let expected: Vec<(Vec<u8>, Vec<u8>)> = rows
                .into_iter()
                .filter(|(k, _)| k.starts_with(&prefix))
                .collect();

            prop_assert_eq!(kv.last_with_prefix(&prefix).unwrap(), expected.last().cloned());
            prop_assert_eq!(kv.scan_prefix(&prefix).unwrap(), expected);
        }
    }
}
