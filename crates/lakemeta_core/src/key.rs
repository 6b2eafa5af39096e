//! Key encoding and versioning.
//!
//! ```text
//! entity version key = | type code (1) | enc(level_1) ... enc(level_n) | enc(name) | stamp (12) |
//! id index key       = | 0xF0 | id (8, big-endian) |
//! stamp              = | millis (8, big-endian) | seq (4, big-endian) |
//! version value      = | flag (1) | payload |
//! ```
//!
//! `enc` escapes `0x00` as `0x00 0xFF` and terminates every component with
//! `0x00 0x01`. Components are therefore prefix-free and compare in the
//! same order as the strings they encode, which gives these ranges:
//!
//! - all versions of one entity share `entity_prefix`, oldest first
//! - the direct children of type `T` of a namespace share
//!   `code(T) | enc(levels)`, because every type lives at a fixed depth
//! - descendants of an entity share `code(U) | enc(path)` for each deeper
//!   type `U`

use crate::clock::Clock;
use crate::entity::EntityType;
use crate::error::{StoreError, StoreResult};
use crate::id::EntityId;
use crate::ident::{NameIdentifier, Namespace};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// First byte of id index keys.
pub const ID_INDEX_PREFIX: u8 = 0xF0;

/// Key holding the highest id ever assigned.
pub const ID_WATERMARK_KEY: [u8; 2] = [0xF1, 0x01];

/// Encoded size of a [`VersionStamp`].
pub const STAMP_LEN: usize = 12;

const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xFF;
const TERMINATOR: u8 = 0x01;

/// Appends the order-preserving encoding of one path component.
pub fn encode_component(out: &mut Vec<u8>, component: &str) {
    for &byte in component.as_bytes() {
        out.push(byte);
        if byte == ESCAPE {
            out.push(ESCAPED_ZERO);
        }
    }
    out.push(ESCAPE);
    out.push(TERMINATOR);
}

/// Decodes one component from the front of `bytes`, returning it and the
/// number of bytes consumed.
///
/// # Errors
///
/// Returns `Serialization` if the component is unterminated or not UTF-8.
pub fn decode_component(bytes: &[u8]) -> StoreResult<(String, usize)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i];
        if byte != ESCAPE {
            out.push(byte);
            i += 1;
            continue;
        }
        match bytes.get(i + 1) {
            Some(&ESCAPED_ZERO) => {
                out.push(ESCAPE);
                i += 2;
            }
            Some(&TERMINATOR) => {
                let text = String::from_utf8(out)
                    .map_err(|_| StoreError::serialization("key component is not UTF-8"))?;
                return Ok((text, i + 2));
            }
            _ => break,
        }
    }
    Err(StoreError::serialization("unterminated key component"))
}

fn typed_prefix<'a>(entity_type: EntityType, path: impl IntoIterator<Item = &'a str>) -> Vec<u8> {
    let mut out = vec![entity_type.code()];
    for component in path {
        encode_component(&mut out, component);
    }
    out
}

/// Prefix of every version of the entity `ident` of type `entity_type`.
#[must_use]
pub fn entity_prefix(entity_type: EntityType, ident: &NameIdentifier) -> Vec<u8> {
    typed_prefix(entity_type, ident.path())
}

/// Prefix of every version of every direct child of type `entity_type`
/// in `namespace`.
#[must_use]
pub fn children_prefix(entity_type: EntityType, namespace: &Namespace) -> Vec<u8> {
    typed_prefix(entity_type, namespace.levels().iter().map(String::as_str))
}

/// Prefixes covering every descendant of `ident`, one per deeper type.
#[must_use]
pub fn descendant_prefixes(entity_type: EntityType, ident: &NameIdentifier) -> Vec<(EntityType, Vec<u8>)> {
    EntityType::ALL
        .into_iter()
        .filter(|t| t.depth() > entity_type.depth())
        .map(|t| (t, typed_prefix(t, ident.path())))
        .collect()
}

/// Builds a version key from an entity prefix and a stamp.
#[must_use]
pub fn version_key(prefix: &[u8], stamp: VersionStamp) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + STAMP_LEN);
    key.extend_from_slice(prefix);
    key.extend_from_slice(&stamp.to_bytes());
    key
}

/// Splits a version key into its entity prefix and stamp.
///
/// # Errors
///
/// Returns `Serialization` if the key is too short to hold a stamp.
pub fn split_version_key(key: &[u8]) -> StoreResult<(&[u8], VersionStamp)> {
    if key.len() <= STAMP_LEN {
        return Err(StoreError::serialization("version key too short"));
    }
    let (prefix, stamp) = key.split_at(key.len() - STAMP_LEN);
    Ok((prefix, VersionStamp::from_bytes(stamp)?))
}

/// Decodes an entity prefix into its type and identifier.
///
/// # Errors
///
/// Returns `Serialization` if the prefix is malformed.
pub fn decode_entity_prefix(prefix: &[u8]) -> StoreResult<(EntityType, NameIdentifier)> {
    let (&code, mut rest) = prefix
        .split_first()
        .ok_or_else(|| StoreError::serialization("empty entity key"))?;
    let entity_type = EntityType::from_code(code)
        .ok_or_else(|| StoreError::serialization(format!("unknown entity type code {code:#04x}")))?;

    let mut path = Vec::with_capacity(entity_type.depth() + 1);
    while !rest.is_empty() {
        let (component, used) = decode_component(rest)?;
        path.push(component);
        rest = &rest[used..];
    }
    if path.len() != entity_type.depth() + 1 {
        return Err(StoreError::serialization(format!(
            "{entity_type} key has {} components",
            path.len()
        )));
    }
    let ident = NameIdentifier::from_path(path)
        .map_err(|e| StoreError::serialization(format!("invalid identifier in key: {e}")))?;
    Ok((entity_type, ident))
}

/// Key of the id index entry for `id`.
#[must_use]
pub fn id_index_key(id: EntityId) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(ID_INDEX_PREFIX);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

/// Logical timestamp of a version.
///
/// Stamps order by wall-clock milliseconds and then by a sequence number
/// that breaks ties between writes landing in the same millisecond.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VersionStamp {
    /// Milliseconds since the Unix epoch.
    pub millis: u64,
    /// Tie-breaking sequence within `millis`.
    pub seq: u32,
}

impl VersionStamp {
    /// Creates a stamp.
    #[must_use]
    pub const fn new(millis: u64, seq: u32) -> Self {
        Self { millis, seq }
    }

    /// Big-endian encoding, which sorts like the stamp.
    #[must_use]
    pub fn to_bytes(self) -> [u8; STAMP_LEN] {
        let mut out = [0u8; STAMP_LEN];
        out[..8].copy_from_slice(&self.millis.to_be_bytes());
        out[8..].copy_from_slice(&self.seq.to_be_bytes());
        out
    }

    /// Decodes a stamp.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if `bytes` is not exactly [`STAMP_LEN`] long.
    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        if bytes.len() != STAMP_LEN {
            return Err(StoreError::serialization("version stamp has wrong length"));
        }
        let mut millis = [0u8; 8];
        let mut seq = [0u8; 4];
        millis.copy_from_slice(&bytes[..8]);
        seq.copy_from_slice(&bytes[8..]);
        Ok(Self {
            millis: u64::from_be_bytes(millis),
            seq: u32::from_be_bytes(seq),
        })
    }

    fn successor(self) -> Self {
        match self.seq.checked_add(1) {
            Some(seq) => Self::new(self.millis, seq),
            None => Self::new(self.millis.saturating_add(1), 0),
        }
    }
}

impl fmt::Debug for VersionStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionStamp({}.{})", self.millis, self.seq)
    }
}

/// State recorded by a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VersionFlag {
    /// The entity as of this version.
    Live = 0,
    /// The entity was dropped.
    Tombstone = 1,
    /// The entity moved to another name.
    Renamed = 2,
}

impl VersionFlag {
    /// Returns the flag for a stored byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Live),
            1 => Some(Self::Tombstone),
            2 => Some(Self::Renamed),
            _ => None,
        }
    }
}

/// Builds a version value.
#[must_use]
pub fn encode_value(flag: VersionFlag, payload: &[u8]) -> Vec<u8> {
    let mut value = Vec::with_capacity(1 + payload.len());
    value.push(flag as u8);
    value.extend_from_slice(payload);
    value
}

/// Splits a version value into its flag and payload.
///
/// # Errors
///
/// Returns `Serialization` for an empty value or unknown flag.
pub fn decode_value(value: &[u8]) -> StoreResult<(VersionFlag, &[u8])> {
    let (&byte, payload) = value
        .split_first()
        .ok_or_else(|| StoreError::serialization("empty version value"))?;
    let flag = VersionFlag::from_byte(byte)
        .ok_or_else(|| StoreError::serialization(format!("unknown version flag {byte}")))?;
    Ok((flag, payload))
}

/// Issues strictly increasing version stamps.
///
/// Stamps follow the wall clock. When the clock has not moved past the
/// last issued stamp (same millisecond, or a small step backwards) the
/// stamp keeps the higher millisecond and bumps the sequence.
#[derive(Debug)]
pub struct VersionClock {
    clock: Arc<dyn Clock>,
    max_skew_ms: u64,
    last: Mutex<VersionStamp>,
}

impl VersionClock {
    /// Creates a version clock.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, max_skew: Duration) -> Self {
        Self {
            clock,
            max_skew_ms: u64::try_from(max_skew.as_millis()).unwrap_or(u64::MAX),
            last: Mutex::new(VersionStamp::default()),
        }
    }

    /// Returns the underlying wall clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Issues a stamp later than every stamp issued so far and later than
    /// `latest`, the current version of the entity being written.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the wall clock trails `latest` by more than
    /// the configured skew.
    pub fn next(&self, latest: Option<VersionStamp>) -> StoreResult<VersionStamp> {
        let now = self.clock.now_millis();
        if let Some(latest) = latest {
            if latest.millis > now.saturating_add(self.max_skew_ms) {
                return Err(StoreError::conflict(format!(
                    "clock skew: current version at {} ms is {} ms ahead of wall clock, limit {} ms",
                    latest.millis,
                    latest.millis - now,
                    self.max_skew_ms
                )));
            }
        }

        let mut last = self.last.lock();
        let floor = latest.map_or(*last, |l| l.max(*last));
        let stamp = if now > floor.millis {
            VersionStamp::new(now, 0)
        } else {
            floor.successor()
        };
        *last = stamp;
        Ok(stamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use proptest::prelude::*;

    fn ident(text: &str) -> NameIdentifier {
        NameIdentifier::parse(text).unwrap()
    }

    #[test]
    fn component_escapes_zero_bytes() {
        let mut out = Vec::new();
        encode_component(&mut out, "a\0b");
        assert_eq!(out, vec![b'a', 0x00, 0xFF, b'b', 0x00, 0x01]);
        assert_eq!(decode_component(&out).unwrap(), ("a\0b".to_string(), 6));
    }

    #[test]
    fn unterminated_component_fails() {
        assert!(decode_component(b"abc").is_err());
        assert!(decode_component(&[b'a', 0x00, 0x07]).is_err());
    }

    #[test]
    fn entity_prefix_roundtrip() {
        let table = ident("m1.c1.s1.t1");
        let prefix = entity_prefix(EntityType::Table, &table);
        assert_eq!(
            decode_entity_prefix(&prefix).unwrap(),
            (EntityType::Table, table)
        );
    }

    #[test]
    fn decode_rejects_wrong_depth() {
        let prefix = entity_prefix(EntityType::Table, &ident("m1.c1.s1"));
        assert!(decode_entity_prefix(&prefix).is_err());
    }

    #[test]
    fn children_prefix_excludes_similar_names_and_grandchildren() {
        let ns = Namespace::of(["m1", "c1"]).unwrap();
        let prefix = children_prefix(EntityType::Schema, &ns);

        let child = entity_prefix(EntityType::Schema, &ident("m1.c1.s1"));
        let cousin = entity_prefix(EntityType::Schema, &ident("m1.c10.s1"));
        let grandchild = entity_prefix(EntityType::Table, &ident("m1.c1.s1.t1"));

        assert!(child.starts_with(&prefix));
        assert!(!cousin.starts_with(&prefix));
        assert!(!grandchild.starts_with(&prefix));
    }

    #[test]
    fn entity_prefix_does_not_cover_longer_names() {
        let short = entity_prefix(EntityType::Schema, &ident("m1.c1.s"));
        let long = entity_prefix(EntityType::Schema, &ident("m1.c1.s1"));
        assert!(!long.starts_with(&short));
    }

    #[test]
    fn descendants_cover_every_deeper_type() {
        let catalog = ident("m1.c1");
        let prefixes = descendant_prefixes(EntityType::Catalog, &catalog);
        let types: Vec<_> = prefixes.iter().map(|(t, _)| *t).collect();
        assert_eq!(
            types,
            vec![EntityType::Schema, EntityType::Table, EntityType::Fileset]
        );

        let fileset = entity_prefix(EntityType::Fileset, &ident("m1.c1.s1.f1"));
        assert!(fileset.starts_with(&prefixes[2].1));
    }

    #[test]
    fn version_keys_sort_by_stamp() {
        let prefix = entity_prefix(EntityType::Metalake, &ident("m1"));
        let a = version_key(&prefix, VersionStamp::new(5, 9));
        let b = version_key(&prefix, VersionStamp::new(6, 0));
        let c = version_key(&prefix, VersionStamp::new(6, 1));
        assert!(a < b && b < c);

        let (p, stamp) = split_version_key(&c).unwrap();
        assert_eq!(p, prefix.as_slice());
        assert_eq!(stamp, VersionStamp::new(6, 1));
    }

    #[test]
    fn value_flags_roundtrip() {
        let value = encode_value(VersionFlag::Renamed, b"m1.c2");
        assert_eq!(decode_value(&value).unwrap(), (VersionFlag::Renamed, &b"m1.c2"[..]));
        assert!(decode_value(&[]).is_err());
        assert!(decode_value(&[9]).is_err());
    }

    #[test]
    fn id_index_keys_sort_by_id() {
        assert!(id_index_key(EntityId::new(255)) < id_index_key(EntityId::new(256)));
        assert_eq!(id_index_key(EntityId::new(1))[0], ID_INDEX_PREFIX);
    }

    #[test]
    fn version_clock_breaks_ties_with_sequence() {
        let clock = Arc::new(ManualClock::new(1_000));
        let versions = VersionClock::new(clock.clone(), Duration::from_secs(1));

        let a = versions.next(None).unwrap();
        let b = versions.next(Some(a)).unwrap();
        assert_eq!(a, VersionStamp::new(1_000, 0));
        assert_eq!(b, VersionStamp::new(1_000, 1));

        clock.rewind(Duration::from_millis(200));
        let c = versions.next(Some(b)).unwrap();
        assert_eq!(c, VersionStamp::new(1_000, 2));

        clock.advance(Duration::from_millis(500));
        let d = versions.next(Some(c)).unwrap();
        assert_eq!(d, VersionStamp::new(1_300, 0));
    }

    #[test]
    fn version_clock_rejects_skew_beyond_limit() {
        let clock = Arc::new(ManualClock::new(10_000));
        let versions = VersionClock::new(clock, Duration::from_secs(1));

        let ahead = VersionStamp::new(11_500, 0);
        assert!(matches!(
            versions.next(Some(ahead)),
            Err(StoreError::Conflict { .. })
        ));

        let within = VersionStamp::new(10_800, 3);
        assert_eq!(
            versions.next(Some(within)).unwrap(),
            VersionStamp::new(10_800, 4)
        );
    }

    proptest! {
        #[test]
        fn component_encoding_preserves_order(a in "\\PC{0,12}", b in "\\PC{0,12}") {
            let mut ea = Vec::new();
            let mut eb = Vec::new();
            encode_component(&mut ea, &a);
            encode_component(&mut eb, &b);
            prop_assert_eq!(a.as_bytes().cmp(b.as_bytes()), ea.cmp(&eb));
        }

        #[test]
        fn component_encoding_is_prefix_free(a in "[a-z\\x00]{0,8}", b in "[a-z\\x00]{0,8}") {
            prop_assume!(a != b);
            let mut ea = Vec::new();
            let mut eb = Vec::new();
            encode_component(&mut ea, &a);
            encode_component(&mut eb, &b);
            prop_assert!(!eb.starts_with(&ea));
        }

        #[test]
        fn stamps_sort_like_bytes(m1 in any::<u64>(), s1 in any::<u32>(), m2 in any::<u64>(), s2 in any::<u32>()) {
            let a = VersionStamp::new(m1, s1);
            let b = VersionStamp::new(m2, s2);
            prop_assert_eq!(a.cmp(&b), a.to_bytes().cmp(&b.to_bytes()));
        }
    }
}
