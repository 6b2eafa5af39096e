//! Hierarchical lock manager.
//!
//! Every identifier path maps to a reader-writer lock. A mutation takes
//! shared locks on each ancestor path and exclusive locks on its targets,
//! always in ascending path order so that two mutations can never wait on
//! each other in a cycle. The effect:
//!
//! - mutations of the same identifier serialize
//! - mutations of disjoint identifiers run in parallel
//! - an exclusive lock on a parent (cascade drop, subtree rename) excludes
//!   concurrent child creation

use crate::error::{StoreError, StoreResult};
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// A lock path: identifier components, outermost first.
pub type LockPath = Vec<String>;

enum Held {
    // Fields are held for their drop side effect.
    Read(#[allow(dead_code)] ArcRwLockReadGuard<RawRwLock, ()>),
    Write(#[allow(dead_code)] ArcRwLockWriteGuard<RawRwLock, ()>),
}

/// Locks held for one mutation. Released on drop, leaf first.
pub struct TreeLockGuard {
    held: Vec<Held>,
}

impl TreeLockGuard {
    /// Number of locks held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// Returns true if no lock is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Number of exclusive locks held.
    #[must_use]
    pub fn exclusive_count(&self) -> usize {
        self.held
            .iter()
            .filter(|h| matches!(h, Held::Write(_)))
            .count()
    }
}

impl Drop for TreeLockGuard {
    fn drop(&mut self) {
        while self.held.pop().is_some() {}
    }
}

/// Grants hierarchical locks over identifier paths.
#[derive(Debug)]
pub struct TreeLockManager {
    nodes: Mutex<HashMap<LockPath, Arc<RwLock<()>>>>,
    timeout: Duration,
}

impl TreeLockManager {
    /// Creates a manager whose acquisitions give up after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Locks `targets` exclusively and all of their ancestors shared.
    ///
    /// The root path (no components) is always an ancestor.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if any lock is not granted within the timeout.
    /// Locks acquired before the failure are released.
    pub fn lock(&self, targets: &[LockPath]) -> StoreResult<TreeLockGuard> {
        let mut plan: BTreeMap<LockPath, bool> = BTreeMap::new();
        for target in targets {
            for depth in 0..target.len() {
                plan.entry(target[..depth].to_vec()).or_insert(false);
            }
            plan.insert(target.clone(), true);
        }

        let nodes: Vec<(LockPath, bool, Arc<RwLock<()>>)> = {
            let mut map = self.nodes.lock();
            plan.into_iter()
                .map(|(path, exclusive)| {
                    let node = Arc::clone(map.entry(path.clone()).or_default());
                    (path, exclusive, node)
                })
                .collect()
        };

        let mut guard = TreeLockGuard {
            held: Vec::with_capacity(nodes.len()),
        };
        for (path, exclusive, node) in nodes {
            let held = if exclusive {
                node.try_write_arc_for(self.timeout).map(Held::Write)
            } else {
                node.try_read_arc_for(self.timeout).map(Held::Read)
            };
            match held {
                Some(h) => guard.held.push(h),
                None => {
                    return Err(StoreError::conflict(format!(
                        "timed out after {:?} waiting for lock on '{}'",
                        self.timeout,
                        path.join(".")
                    )))
                }
            }
        }

        trace!(locks = guard.len(), "acquired tree locks");
        Ok(guard)
    }

    /// Drops nodes no mutation currently holds or waits for.
    pub fn prune(&self) -> usize {
        let mut map = self.nodes.lock();
        let before = map.len();
        map.retain(|_, node| Arc::strong_count(node) > 1);
        before - map.len()
    }

    /// Number of tracked nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.lock().len()
    }
}
