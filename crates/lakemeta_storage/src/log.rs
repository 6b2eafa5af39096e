//! Durable key-value engine backed by an append-only batch log.
//!
//! ```text
//! <root>/
//! ├─ LOCK              # Advisory lock for single-writer
//! ├─ kv.log            # Append-only log of batch records
//! └─ kv.log.compact    # Temporary file while compacting
//! ```
//!
//! Every acknowledged batch is one checksummed record in `kv.log`. The live
//! key set is rebuilt from the log on open and kept in an in-memory
//! `BTreeMap`. Compaction rewrites the live key set into a fresh log and
//! atomically swaps it in.

use crate::backend::{BatchOp, KvBackend, WriteBatch};
use crate::error::{StorageError, StorageResult};
use crate::memory::{apply_ops, prefix_range};
use crate::record::{decode_batch, encode_batch, Decoded};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

const LOCK_FILE: &str = "LOCK";
const LOG_FILE: &str = "kv.log";
const COMPACT_FILE: &str = "kv.log.compact";

/// Maximum number of operations per record written by compaction.
const COMPACT_CHUNK: usize = 4096;

/// Fixed per-row overhead in a batch record: tag, key length, value length.
const ROW_OVERHEAD: u64 = 9;

/// Options for opening a [`LogKv`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogKvOptions {
    /// Root directory holding the log and lock files.
    pub path: PathBuf,
    /// Whether to `fsync` the log after every batch.
    ///
    /// Without it a batch is handed to the OS before `write_batch`
    /// returns but may be lost on power failure.
    pub sync_on_commit: bool,
    /// Minimum log size in bytes before automatic compaction is considered.
    pub compact_threshold: u64,
}

impl LogKvOptions {
    /// Creates options for the given root directory with default settings.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sync_on_commit: true,
            compact_threshold: 4 * 1024 * 1024,
        }
    }

    /// Sets whether each batch is synced to disk.
    #[must_use]
    pub fn sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }

    /// Sets the automatic compaction threshold.
    #[must_use]
    pub fn compact_threshold(mut self, bytes: u64) -> Self {
        self.compact_threshold = bytes;
        self
    }
}

struct LogState {
    rows: BTreeMap<Vec<u8>, Vec<u8>>,
    file: File,
    /// Bytes of valid records in the log.
    log_len: u64,
    /// Approximate encoded size of the live rows.
    live_bytes: u64,
}

/// A persistent ordered key-value backend.
///
/// # Durability
///
/// `write_batch` appends one record and flushes it (and syncs it when
/// [`LogKvOptions::sync_on_commit`] is set) before the batch becomes
/// visible to readers.
///
/// # Recovery
///
/// On open the log is replayed from the start. A record cut short by a
/// crash during append is discarded and the file is truncated to the last
/// complete record. A complete record that fails its checksum is reported
/// as [`StorageError::Corrupted`].
///
/// # Example
///
/// ```no_run
/// use lakemeta_storage::{KvBackend, LogKv, LogKvOptions};
///
/// let kv = LogKv::open(LogKvOptions::new("/var/lib/lakemeta")).unwrap();
/// kv.put(b"key", b"value").unwrap();
/// kv.close().unwrap();
/// ```
pub struct LogKv {
    root: PathBuf,
    options: LogKvOptions,
    state: RwLock<LogState>,
    lock_file: Mutex<Option<File>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for LogKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogKv")
            .field("root", &self.root)
            .field("options", &self.options)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl LogKv {
    /// Opens or creates a log engine under `options.path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process holds the directory lock (`Locked`)
    /// - A complete record in the log is corrupted (`Corrupted`)
    /// - I/O errors occur
    pub fn open(options: LogKvOptions) -> StorageResult<Self> {
        let root = options.path.clone();
        fs::create_dir_all(&root)?;
        if !root.is_dir() {
            return Err(StorageError::InvalidOptions(format!(
                "path is not a directory: {}",
                root.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(root.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked {
                path: root.display().to_string(),
            });
        }

        // A leftover compaction file never replaced the log.
        let compact_path = root.join(COMPACT_FILE);
        if compact_path.exists() {
            warn!(path = %compact_path.display(), "removing incomplete compaction file");
            fs::remove_file(&compact_path)?;
        }

        let log_path = root.join(LOG_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&log_path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let (rows, log_len, records) = replay(&data)?;
        if log_len < data.len() as u64 {
            warn!(
                path = %log_path.display(),
                valid = log_len,
                actual = data.len(),
                "discarding torn tail record"
            );
            file.set_len(log_len)?;
            file.sync_all()?;
        }

        let live_bytes = rows.iter().map(|(k, v)| row_cost(k, v)).sum();
        info!(
            path = %root.display(),
            records,
            keys = rows.len(),
            "opened log backend"
        );

        Ok(Self {
            root,
            options,
            state: RwLock::new(LogState {
                rows,
                file,
                log_len,
                live_bytes,
            }),
            lock_file: Mutex::new(Some(lock_file)),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Returns the current size of the log in bytes.
    #[must_use]
    pub fn log_size(&self) -> u64 {
        self.state.read().log_len
    }

    /// Rewrites the log so that it holds only the live key set.
    ///
    /// Uses write-then-rename for crash safety:
    /// 1. Write the live rows to `kv.log.compact`
    /// 2. Sync the temporary file to disk
    /// 3. Rename it over `kv.log`
    /// 4. Sync the directory so the rename is durable
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed or I/O fails. The existing
    /// log stays authoritative until the rename succeeds.
    pub fn compact(&self) -> StorageResult<()> {
        self.ensure_open()?;
        let mut state = self.state.write();
        self.compact_locked(&mut state)
    }

    fn compact_locked(&self, state: &mut LogState) -> StorageResult<()> {
        let before = state.log_len;
        let compact_path = self.root.join(COMPACT_FILE);
        let log_path = self.root.join(LOG_FILE);

        let mut written = 0u64;
        {
            let mut temp = File::create(&compact_path)?;
            let rows: Vec<BatchOp> = state
                .rows
                .iter()
                .map(|(k, v)| BatchOp::Put {
                    key: k.clone(),
                    value: v.clone(),
                })
                .collect();
            for chunk in rows.chunks(COMPACT_CHUNK) {
                let record = encode_batch(chunk)?;
                temp.write_all(&record)?;
                written += record.len() as u64;
            }
            temp.sync_all()?;
        }

        fs::rename(&compact_path, &log_path)?;
        sync_directory(&self.root)?;

        state.file = OpenOptions::new().read(true).append(true).open(&log_path)?;
        state.log_len = written;

        info!(before, after = written, "compacted log");
        Ok(())
    }

    fn should_compact(&self, state: &LogState) -> bool {
        state.log_len > self.options.compact_threshold
            && state.log_len > state.live_bytes.saturating_mul(2)
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

fn replay(data: &[u8]) -> StorageResult<(BTreeMap<Vec<u8>, Vec<u8>>, u64, usize)> {
    let mut rows = BTreeMap::new();
    let mut offset = 0usize;
    let mut records = 0usize;

    while offset < data.len() {
        match decode_batch(&data[offset..]) {
            Ok(Decoded::Record { ops, len }) => {
                apply_ops(&mut rows, ops);
                offset += len;
                records += 1;
            }
            Ok(Decoded::Truncated) => break,
            Err(StorageError::Corrupted(msg)) => {
                return Err(StorageError::Corrupted(format!(
                    "record at offset {offset}: {msg}"
                )))
            }
            Err(e) => return Err(e),
        }
    }

    Ok((rows, offset as u64, records))
}

fn append_record(file: &mut File, record: &[u8], sync: bool) -> std::io::Result<()> {
    file.write_all(record)?;
    file.flush()?;
    if sync {
        file.sync_all()?;
    }
    Ok(())
}

fn row_cost(key: &[u8], value: &[u8]) -> u64 {
    (key.len() + value.len()) as u64 + ROW_OVERHEAD
}

#[cfg(unix)]
fn sync_directory(path: &Path) -> StorageResult<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> StorageResult<()> {
    // NTFS journals metadata updates
    Ok(())
}

impl KvBackend for LogKv {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.state.read().rows.get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.ensure_open()?;
        let state = self.state.read();
        Ok(prefix_range(&state.rows, prefix)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn last_with_prefix(&self, prefix: &[u8]) -> StorageResult<Option<(Vec<u8>, Vec<u8>)>> {
        self.ensure_open()?;
        let state = self.state.read();
        let last = prefix_range(&state.rows, prefix)
            .next_back()
            .map(|(k, v)| (k.clone(), v.clone()));
        Ok(last)
    }

    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        self.ensure_open()?;
        if batch.is_empty() {
            return Ok(());
        }

        let record = encode_batch(batch.ops())?;
        let mut state = self.state.write();

        if let Err(e) = append_record(&mut state.file, &record, self.options.sync_on_commit) {
            // Drop any partial bytes so the next record starts at a boundary.
            let valid = state.log_len;
            if let Err(trunc) = state.file.set_len(valid) {
                warn!(error = %trunc, "failed to roll back partial record");
            }
            return Err(e.into());
        }

        state.log_len += record.len() as u64;
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    let added = row_cost(&key, &value);
                    if let Some(old) = state.rows.insert(key.clone(), value) {
                        state.live_bytes = state.live_bytes.saturating_sub(row_cost(&key, &old));
                    }
                    state.live_bytes += added;
                }
                BatchOp::Delete { key } => {
                    if let Some(old) = state.rows.remove(&key) {
                        state.live_bytes = state.live_bytes.saturating_sub(row_cost(&key, &old));
                    }
                }
            }
        }

        if self.should_compact(&state) {
            // The batch is already durable; a failed compaction only leaves
            // the log larger than necessary.
            if let Err(e) = self.compact_locked(&mut state) {
                warn!(error = %e, "automatic compaction failed");
            }
        }

        Ok(())
    }

    fn len(&self) -> StorageResult<usize> {
        self.ensure_open()?;
        Ok(self.state.read().rows.len())
    }

    fn maintain(&self) -> StorageResult<()> {
        self.ensure_open()?;
        let mut state = self.state.write();
        if self.should_compact(&state) {
            debug!(
                log_len = state.log_len,
                live_bytes = state.live_bytes,
                "log exceeds live size, compacting"
            );
            self.compact_locked(&mut state)?;
        }
        Ok(())
    }

    fn flush(&self) -> StorageResult<()> {
        self.ensure_open()?;
        let mut state = self.state.write();
        state.file.flush()?;
        state.file.sync_all()?;
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        {
            let mut state = self.state.write();
            state.file.flush()?;
            state.file.sync_all()?;
        }

        if let Some(lock_file) = self.lock_file.lock().take() {
            lock_file.unlock()?;
        }

        debug!(path = %self.root.display(), "closed log backend");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn options(dir: &Path) -> LogKvOptions {
        LogKvOptions::new(dir.join("kv"))
    }

    #[test]
    fn log_persists_across_reopen() {
        let dir = tempdir().unwrap();

        {
            let kv = LogKv::open(options(dir.path())).unwrap();
            let mut batch = WriteBatch::new();
            batch
                .put(b"a".to_vec(), b"1".to_vec())
                .put(b"b".to_vec(), b"2".to_vec());
            kv.write_batch(batch).unwrap();
            kv.delete(b"a").unwrap();
            kv.close().unwrap();
        }

        let kv = LogKv::open(options(dir.path())).unwrap();
        assert_eq!(kv.get(b"a").unwrap(), None);
        assert_eq!(kv.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(kv.len().unwrap(), 1);
    }

    #[test]
    fn log_last_with_prefix() {
        let dir = tempdir().unwrap();
        let kv = LogKv::open(options(dir.path())).unwrap();
        let mut batch = WriteBatch::new();
        batch
            .put(vec![1, 1], b"a".to_vec())
            .put(vec![1, 2], b"b".to_vec())
            .put(vec![2, 0], b"c".to_vec())
            .put(vec![0xFF, 7], b"d".to_vec());
        kv.write_batch(batch).unwrap();

        assert_eq!(
            kv.last_with_prefix(&[1]).unwrap(),
            Some((vec![1, 2], b"b".to_vec()))
        );
        assert_eq!(
            kv.last_with_prefix(&[0xFF]).unwrap(),
            Some((vec![0xFF, 7], b"d".to_vec()))
        );
        assert_eq!(kv.last_with_prefix(&[3]).unwrap(), None);

        kv.delete(&[1, 2]).unwrap();
        assert_eq!(
            kv.last_with_prefix(&[1]).unwrap(),
            Some((vec![1, 1], b"a".to_vec()))
        );
    }

    #[test]
    fn log_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _kv = LogKv::open(options(dir.path())).unwrap();

        let result = LogKv::open(options(dir.path()));
        assert!(matches!(result, Err(StorageError::Locked { .. })));
    }

    #[test]
    fn log_close_releases_lock() {
        let dir = tempdir().unwrap();
        let kv = LogKv::open(options(dir.path())).unwrap();
        kv.close().unwrap();
        kv.close().unwrap();

        assert!(matches!(kv.get(b"k"), Err(StorageError::Closed)));
        let reopened = LogKv::open(options(dir.path()));
        assert!(reopened.is_ok());
    }

    #[test]
    fn log_discards_torn_tail() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path());

        {
            let kv = LogKv::open(opts.clone()).unwrap();
            kv.put(b"kept", b"yes").unwrap();
            kv.put(b"torn", b"maybe").unwrap();
            kv.close().unwrap();
        }

        // Cut the second record in half.
        let log_path = opts.path.join(LOG_FILE);
        let full = fs::metadata(&log_path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&log_path).unwrap();
        file.set_len(full - 5).unwrap();
        drop(file);

        let kv = LogKv::open(opts.clone()).unwrap();
        assert_eq!(kv.get(b"kept").unwrap(), Some(b"yes".to_vec()));
        assert_eq!(kv.get(b"torn").unwrap(), None);

        // File was truncated to the last good record, so appends continue cleanly.
        kv.put(b"after", b"crash").unwrap();
        kv.close().unwrap();
        drop(kv);

        let kv = LogKv::open(opts).unwrap();
        assert_eq!(kv.get(b"after").unwrap(), Some(b"crash".to_vec()));
    }

    #[test]
    fn log_detects_corruption() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path());

        {
            let kv = LogKv::open(opts.clone()).unwrap();
            kv.put(b"key", b"value").unwrap();
            kv.close().unwrap();
        }

        let log_path = opts.path.join(LOG_FILE);
        let mut data = fs::read(&log_path).unwrap();
        let mid = data.len() / 2;
        data[mid] ^= 0xFF;
        fs::write(&log_path, &data).unwrap();

        let result = LogKv::open(opts);
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn log_compact_keeps_live_rows() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path()).sync_on_commit(false);

        let kv = LogKv::open(opts.clone()).unwrap();
        for i in 0..50u32 {
            kv.put(b"hot", &i.to_le_bytes()).unwrap();
        }
        kv.put(b"cold", b"c").unwrap();
        kv.delete(b"cold").unwrap();

        let before = kv.log_size();
        kv.compact().unwrap();
        assert!(kv.log_size() < before);
        assert!(!opts.path.join(COMPACT_FILE).exists());

        kv.put(b"next", b"n").unwrap();
        kv.close().unwrap();
        drop(kv);

        let kv = LogKv::open(opts).unwrap();
        assert_eq!(kv.get(b"hot").unwrap(), Some(49u32.to_le_bytes().to_vec()));
        assert_eq!(kv.get(b"cold").unwrap(), None);
        assert_eq!(kv.get(b"next").unwrap(), Some(b"n".to_vec()));
    }

    #[test]
    fn log_maintain_compacts_past_threshold() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path())
            .sync_on_commit(false)
            .compact_threshold(u64::MAX);

        let kv = LogKv::open(opts.clone()).unwrap();
        for i in 0..100u32 {
            kv.put(b"k", &i.to_le_bytes()).unwrap();
        }
        let grown = kv.log_size();

        // Threshold not reached: nothing happens.
        kv.maintain().unwrap();
        assert_eq!(kv.log_size(), grown);
        kv.close().unwrap();
        drop(kv);

        let kv = LogKv::open(opts.compact_threshold(64)).unwrap();
        kv.maintain().unwrap();
        assert!(kv.log_size() < grown);
        assert_eq!(kv.get(b"k").unwrap(), Some(99u32.to_le_bytes().to_vec()));
    }

    #[test]
    fn log_removes_leftover_compaction_file() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path());
        fs::create_dir_all(&opts.path).unwrap();
        fs::write(opts.path.join(COMPACT_FILE), b"partial").unwrap();

        let kv = LogKv::open(opts.clone()).unwrap();
        assert!(!opts.path.join(COMPACT_FILE).exists());
        assert_eq!(kv.len().unwrap(), 0);
    }
}
