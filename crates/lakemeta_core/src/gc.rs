//! Garbage collection of superseded versions.
//!
//! A version stays readable for the whole retention window after it was
//! superseded, so that a reader that started before a mutation never sees
//! its data disappear. The collector removes:
//!
//! - a version whose successor was written at least `retention` ago
//! - a tombstone or rename marker that is itself at least `retention` old
//!
//! The newest version of a live entity is never removed. Collection never
//! changes what [`EntityStore::load`](crate::EntityStore::load) returns.
//!
//! The retention window is `delete_after + max_skew_time`
//! ([`Config::retention`](crate::Config::retention)): a tombstone exactly
//! `delete_after` old is still kept.

use crate::clock::Clock;
use crate::entity::EntityType;
use crate::error::{StoreError, StoreResult};
use crate::key::{decode_value, split_version_key, VersionFlag, VersionStamp};
use crate::lock::TreeLockManager;
use lakemeta_storage::{KvBackend, StorageError, WriteBatch};
use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of one collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Number of versions examined.
    pub scanned: usize,
    /// Number of versions removed.
    pub versions_removed: usize,
    /// Number of entities whose last version was removed.
    pub entities_purged: usize,
}

/// Removes versions that have outlived the retention window.
#[derive(Clone)]
pub struct GarbageCollector {
    backend: Arc<dyn KvBackend>,
    clock: Arc<dyn Clock>,
    retention_ms: u64,
    locks: Arc<TreeLockManager>,
}

impl fmt::Debug for GarbageCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GarbageCollector")
            .field("backend", &self.backend.name())
            .field("retention_ms", &self.retention_ms)
            .finish_non_exhaustive()
    }
}

impl GarbageCollector {
    /// Creates a collector. `retention` is the delete-after window plus
    /// the tolerated clock skew.
    #[must_use]
    pub fn new(
        backend: Arc<dyn KvBackend>,
        clock: Arc<dyn Clock>,
        retention: Duration,
        locks: Arc<TreeLockManager>,
    ) -> Self {
        Self {
            backend,
            clock,
            retention_ms: u64::try_from(retention.as_millis()).unwrap_or(u64::MAX),
            locks,
        }
    }

    /// Returns the retention window.
    #[must_use]
    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }

    /// Runs one pass at the current time.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if a scan or the delete batch fails,
    /// and `Serialization` for a malformed version key.
    pub fn collect(&self) -> StoreResult<GcStats> {
        self.collect_at(self.clock.now_millis())
    }

    /// Runs one pass as if the wall clock read `now` milliseconds.
    ///
    /// # Errors
    ///
    /// See [`GarbageCollector::collect`].
    pub fn collect_at(&self, now: u64) -> StoreResult<GcStats> {
        let mut stats = GcStats::default();
        let mut batch = WriteBatch::new();

        for entity_type in EntityType::ALL {
            let rows = self.backend.scan_prefix(&[entity_type.code()])?;
            stats.scanned += rows.len();

            let mut start = 0;
            while start < rows.len() {
                let (prefix, _) = split_version_key(&rows[start].0)?;
                let mut end = start + 1;
                while end < rows.len() && split_version_key(&rows[end].0)?.0 == prefix {
                    end += 1;
                }
                self.collect_entity(&rows[start..end], now, &mut batch, &mut stats)?;
                start = end;
            }
        }

        if !batch.is_empty() {
            self.backend.write_batch(batch)?;
        }
        let pruned = self.locks.prune();

        if let Err(e) = self.backend.maintain() {
            warn!(error = %e, "backend maintenance after gc failed");
        }

        if stats.versions_removed > 0 {
            info!(
                scanned = stats.scanned,
                removed = stats.versions_removed,
                purged = stats.entities_purged,
                "garbage collection pass"
            );
        } else {
            debug!(scanned = stats.scanned, pruned_locks = pruned, "garbage collection pass");
        }
        Ok(stats)
    }

    /// Queues the removable versions of one entity, oldest first.
    fn collect_entity(
        &self,
        versions: &[(Vec<u8>, Vec<u8>)],
        now: u64,
        batch: &mut WriteBatch,
        stats: &mut GcStats,
    ) -> StoreResult<()> {
        let stamps = versions
            .iter()
            .map(|(key, _)| split_version_key(key).map(|(_, stamp)| stamp))
            .collect::<StoreResult<Vec<VersionStamp>>>()?;

        let mut removed = 0;
        for (i, (key, value)) in versions.iter().enumerate() {
            let expired_since = match stamps.get(i + 1) {
                Some(successor) => successor.millis,
                None => {
                    let (flag, _) = decode_value(value)?;
                    if flag == VersionFlag::Live {
                        continue;
                    }
                    stamps[i].millis
                }
            };
            if now.saturating_sub(expired_since) >= self.retention_ms {
                batch.delete(key.clone());
                removed += 1;
            }
        }

        stats.versions_removed += removed;
        if removed == versions.len() {
            stats.entities_purged += 1;
        }
        Ok(())
    }
}

/// Background thread running collection passes at a fixed interval.
///
/// Dropping the handle stops the thread.
#[derive(Debug)]
pub struct GcHandle {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl GcHandle {
    /// Starts the GC thread.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the thread cannot be spawned.
    pub fn spawn(collector: GarbageCollector, interval: Duration) -> StoreResult<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread = thread::Builder::new()
            .name("lakemeta-gc".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(e) = collector.collect() {
                            warn!(error = %e, "garbage collection pass failed");
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| StoreError::BackendUnavailable(StorageError::Io(e)))?;

        debug!(?interval, "gc thread started");
        Ok(Self {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Stops the thread and waits for an in-flight pass to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("gc thread panicked");
            }
        }
    }
}

impl Drop for GcHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
