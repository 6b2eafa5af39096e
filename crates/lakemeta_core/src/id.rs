//! Entity identifiers and their generators.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Largest id any generator issues. Ids stay within the positive range of
/// a signed 64-bit integer so that every client can represent them.
pub const MAX_ID: u64 = i64::MAX as u64;

/// Unique identifier for an entity.
///
/// Entity IDs are:
/// - Unique among all entities of a store
/// - Immutable once assigned, including across renames
/// - Never derived from the entity's name
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Creates an entity ID from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the big-endian encoding used in keys.
    #[inline]
    #[must_use]
    pub const fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Creates an entity ID from a big-endian slice.
    ///
    /// Returns `None` if the slice is not exactly 8 bytes.
    #[must_use]
    pub fn from_be_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; 8] = slice.try_into().ok()?;
        Some(Self(u64::from_be_bytes(bytes)))
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of fresh entity ids.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// Returns an id no live entity holds.
    ///
    /// # Errors
    ///
    /// Returns `IdGeneration` if the generator cannot issue an id.
    fn next_id(&self) -> StoreResult<EntityId>;
}

/// Issues random 63-bit ids from version 4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdGenerator;

impl RandomIdGenerator {
    /// Creates a generator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl IdGenerator for RandomIdGenerator {
    fn next_id(&self) -> StoreResult<EntityId> {
        loop {
            let (_, low) = Uuid::new_v4().as_u64_pair();
            let raw = low & MAX_ID;
            if raw != 0 {
                return Ok(EntityId(raw));
            }
        }
    }
}

/// Issues strictly increasing ids from a counter.
///
/// Seed it with [`SequentialIdGenerator::starting_after`] using the highest
/// id the store has ever assigned, so ids are never reused after restart.
#[derive(Debug)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl SequentialIdGenerator {
    /// Creates a generator whose first id is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_after(0)
    }

    /// Creates a generator whose first id is `last + 1`.
    #[must_use]
    pub fn starting_after(last: u64) -> Self {
        Self {
            next: AtomicU64::new(last.saturating_add(1)),
        }
    }
}

impl Default for SequentialIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> StoreResult<EntityId> {
        self.next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current <= MAX_ID).then(|| current + 1)
            })
            .map(EntityId)
            .map_err(|_| StoreError::id_generation("sequential id space exhausted"))
    }
}
