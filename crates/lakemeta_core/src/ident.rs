//! Hierarchical identifiers.
//!
//! A [`Namespace`] is an ordered list of levels (`metalake.catalog.schema`)
//! and a [`NameIdentifier`] is a namespace plus a leaf name. Identifiers are
//! pure values: validation happens at construction and equality is
//! level-wise.
//!
//! A [`StringIdentifier`] is the textual form of an [`EntityId`] carried in
//! an entity's properties so that a retried create can be recognised as the
//! same logical request.

use crate::error::{StoreError, StoreResult};
use crate::id::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Separator between levels in the textual form.
pub const SEPARATOR: char = '.';

/// Characters that may not appear in a level or name.
pub const RESERVED_CHARS: [char; 5] = ['.', '/', '%', '~', '?'];

fn check_component(kind: &str, value: &str) -> StoreResult<()> {
    if value.is_empty() {
        return Err(StoreError::invalid_argument(format!(
            "Invalid {kind}: cannot be empty"
        )));
    }
    if let Some(c) = value.chars().find(|c| RESERVED_CHARS.contains(c)) {
        return Err(StoreError::invalid_argument(format!(
            "Invalid {kind} '{value}': contains reserved character '{c}'"
        )));
    }
    Ok(())
}

/// An ordered list of name levels.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace {
    levels: Vec<String>,
}

impl Namespace {
    /// The namespace of metalakes, which has no levels.
    #[must_use]
    pub const fn root() -> Self {
        Self { levels: Vec::new() }
    }

    /// Creates a namespace from one or more levels.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if no level is given or any level is
    /// empty or contains a reserved character.
    pub fn of<I, S>(levels: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let levels: Vec<String> = levels.into_iter().map(Into::into).collect();
        if levels.is_empty() {
            return Err(StoreError::invalid_argument(
                "Invalid namespace: at least one level is required",
            ));
        }
        for level in &levels {
            check_component("namespace level", level)?;
        }
        Ok(Self { levels })
    }

    /// Returns the levels, outermost first.
    #[must_use]
    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    /// Returns the level at `index`.
    #[must_use]
    pub fn level(&self, index: usize) -> Option<&str> {
        self.levels.get(index).map(String::as_str)
    }

    /// Returns the number of levels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Returns true for the root namespace.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.levels.is_empty()
    }

    /// Returns the enclosing namespace, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.levels.is_empty() {
            return None;
        }
        Some(Self {
            levels: self.levels[..self.levels.len() - 1].to_vec(),
        })
    }

    /// Returns this namespace extended by one level.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `level` is not a valid level.
    pub fn child(&self, level: impl Into<String>) -> StoreResult<Self> {
        let level = level.into();
        check_component("namespace level", &level)?;
        let mut levels = self.levels.clone();
        levels.push(level);
        Ok(Self { levels })
    }

    /// Returns the identifier naming the innermost level, or `None` for
    /// the root.
    #[must_use]
    pub fn to_identifier(&self) -> Option<NameIdentifier> {
        let (name, rest) = self.levels.split_last()?;
        Some(NameIdentifier {
            namespace: Self {
                levels: rest.to_vec(),
            },
            name: name.clone(),
        })
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.levels.join("."))
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Namespace({self})")
    }
}

/// A namespace plus a leaf name.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NameIdentifier {
    namespace: Namespace,
    name: String,
}

impl NameIdentifier {
    /// Creates an identifier.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `name` is empty or contains a reserved
    /// character.
    pub fn of(namespace: Namespace, name: impl Into<String>) -> StoreResult<Self> {
        let name = name.into();
        check_component("name", &name)?;
        Ok(Self { namespace, name })
    }

    /// Creates an identifier from its full path, outermost level first.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the path is empty or any component is
    /// invalid.
    pub fn from_path<I, S>(path: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut levels: Vec<String> = path.into_iter().map(Into::into).collect();
        let name = levels.pop().ok_or_else(|| {
            StoreError::invalid_argument("Invalid name identifier: path cannot be empty")
        })?;
        let namespace = if levels.is_empty() {
            Namespace::root()
        } else {
            Namespace::of(levels)?
        };
        Self::of(namespace, name)
    }

    /// Parses the dotted textual form, e.g. `m1.c1.schema11`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if any component is empty.
    pub fn parse(text: &str) -> StoreResult<Self> {
        Self::from_path(text.split(SEPARATOR))
    }

    /// Returns the namespace.
    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Returns the leaf name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the namespace holding this entity's children.
    #[must_use]
    pub fn to_namespace(&self) -> Namespace {
        let mut levels = self.namespace.levels.clone();
        levels.push(self.name.clone());
        Namespace { levels }
    }

    /// Returns the identifier of the enclosing entity, or `None` for a
    /// top-level identifier.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.namespace.to_identifier()
    }

    /// Returns the full path, outermost level first.
    pub fn path(&self) -> impl Iterator<Item = &str> {
        self.namespace
            .levels
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.name.as_str()))
    }

    /// Returns the number of path components.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.namespace.len() + 1
    }

    /// Returns a sibling identifier with a different leaf name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `name` is invalid.
    pub fn with_name(&self, name: impl Into<String>) -> StoreResult<Self> {
        Self::of(self.namespace.clone(), name)
    }

    /// Returns true if `self` is a strict ancestor of `other`.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        other.namespace.len() > self.namespace.len()
            && self.path().zip(other.path()).all(|(a, b)| a == b)
    }

    /// Rewrites the leading path of `self` from `from` to `to`.
    ///
    /// Returns `None` if `from` is not an ancestor of `self`.
    #[must_use]
    pub fn rebase(&self, from: &Self, to: &Self) -> Option<Self> {
        if !from.is_ancestor_of(self) {
            return None;
        }
        let mut levels: Vec<String> = to.path().map(str::to_string).collect();
        levels.extend(self.namespace.levels[from.depth()..].iter().cloned());
        Some(Self {
            namespace: Namespace { levels },
            name: self.name.clone(),
        })
    }
}

impl fmt::Display for NameIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_root() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}.{}", self.namespace, self.name)
        }
    }
}

impl fmt::Debug for NameIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NameIdentifier({self})")
    }
}

/// Reserved property key holding an entity's [`StringIdentifier`].
pub const ID_PROPERTY_KEY: &str = "lakemeta.identifier";

const STRING_ID_PREFIX: &str = "lakemeta.v1.uid";

/// Textual form of an [`EntityId`] carried in properties.
///
/// The value is `lakemeta.v1.uid<id>`, stored under [`ID_PROPERTY_KEY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StringIdentifier {
    id: EntityId,
}

impl StringIdentifier {
    /// Wraps an entity id.
    #[must_use]
    pub const fn from_id(id: EntityId) -> Self {
        Self { id }
    }

    /// Returns the wrapped id.
    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    /// Parses the textual form.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `text` is not a string identifier.
    pub fn parse(text: &str) -> StoreResult<Self> {
        let digits = text.strip_prefix(STRING_ID_PREFIX).ok_or_else(|| {
            StoreError::invalid_argument(format!("Invalid string identifier: {text}"))
        })?;
        let raw: u64 = digits.parse().map_err(|_| {
            StoreError::invalid_argument(format!("Invalid string identifier: {text}"))
        })?;
        Ok(Self {
            id: EntityId::new(raw),
        })
    }

    /// Reads the identifier embedded in `properties`, if any.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the reserved key is present but
    /// malformed.
    pub fn from_properties(properties: &BTreeMap<String, String>) -> StoreResult<Option<Self>> {
        properties
            .get(ID_PROPERTY_KEY)
            .map(|text| Self::parse(text))
            .transpose()
    }

    /// Returns a copy of `properties` with this identifier embedded.
    #[must_use]
    pub fn new_properties_with_id(
        &self,
        properties: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        let mut out = properties.clone();
        out.insert(ID_PROPERTY_KEY.to_string(), self.to_string());
        out
    }

    /// Returns a copy of `properties` without the reserved key.
    #[must_use]
    pub fn remove_from_properties(
        properties: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        let mut out = properties.clone();
        out.remove(ID_PROPERTY_KEY);
        out
    }
}

impl fmt::Display for StringIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{STRING_ID_PREFIX}{}", self.id.as_u64())
    }
}
