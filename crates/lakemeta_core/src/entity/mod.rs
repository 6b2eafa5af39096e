//! Entity model.
//!
//! Every entity shares an id, a name, a comment, a property map and audit
//! information; [`EntityKind`] carries what is specific to each type.

mod change;
mod codec;

pub use change::{EntityChange, BACKUP_STORAGE_LOCATION_PREFIX, OWNER_PROPERTY};
pub use codec::{EntitySerDe, FramedSerDe};

use crate::id::EntityId;
use crate::ident::{NameIdentifier, StringIdentifier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Discriminant of an entity.
///
/// Each type lives at a fixed depth of the hierarchy: metalakes at the
/// root, catalogs inside metalakes, schemas inside catalogs, and tables and
/// filesets inside schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityType {
    /// Top-level tenant.
    Metalake,
    /// A connector instance inside a metalake.
    Catalog,
    /// A schema inside a catalog.
    Schema,
    /// A table inside a schema.
    Table,
    /// A fileset inside a schema.
    Fileset,
}

impl EntityType {
    /// Every entity type, shallowest first.
    pub const ALL: [EntityType; 5] = [
        EntityType::Metalake,
        EntityType::Catalog,
        EntityType::Schema,
        EntityType::Table,
        EntityType::Fileset,
    ];

    /// Number of namespace levels above entities of this type.
    #[must_use]
    pub const fn depth(self) -> usize {
        match self {
            Self::Metalake => 0,
            Self::Catalog => 1,
            Self::Schema => 2,
            Self::Table | Self::Fileset => 3,
        }
    }

    /// Stable byte identifying the type in keys.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Metalake => 0x01,
            Self::Catalog => 0x02,
            Self::Schema => 0x03,
            Self::Table => 0x04,
            Self::Fileset => 0x05,
        }
    }

    /// Returns the type for a key code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::Metalake),
            0x02 => Some(Self::Catalog),
            0x03 => Some(Self::Schema),
            0x04 => Some(Self::Table),
            0x05 => Some(Self::Fileset),
            _ => None,
        }
    }

    /// Types whose entities live at `depth`.
    pub fn at_depth(depth: usize) -> impl Iterator<Item = EntityType> {
        Self::ALL.into_iter().filter(move |t| t.depth() == depth)
    }

    /// Type of the entity that contains entities of this type.
    #[must_use]
    pub const fn parent_type(self) -> Option<Self> {
        match self {
            Self::Metalake => None,
            Self::Catalog => Some(Self::Metalake),
            Self::Schema => Some(Self::Catalog),
            Self::Table | Self::Fileset => Some(Self::Schema),
        }
    }

    /// Display name used in messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Metalake => "Metalake",
            Self::Catalog => "Catalog",
            Self::Schema => "Schema",
            Self::Table => "Table",
            Self::Fileset => "Fileset",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of data a catalog serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CatalogType {
    /// Relational tables.
    Relational,
    /// Filesets over file storage.
    Fileset,
    /// Message topics.
    Messaging,
}

/// Whether the store owns a fileset's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilesetType {
    /// Storage lifecycle follows the fileset.
    Managed,
    /// Storage is owned elsewhere and only referenced.
    External,
}

/// A table column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name, unique within the table.
    pub name: String,
    /// Engine-specific type name.
    pub data_type: String,
    /// Optional comment.
    #[serde(default)]
    pub comment: Option<String>,
    /// Whether the column accepts nulls.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl Column {
    /// Creates a nullable column without a comment.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            comment: None,
            nullable: true,
        }
    }

    /// Sets the comment.
    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Type-specific attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EntityKind {
    /// A metalake.
    Metalake,
    /// A catalog.
    Catalog {
        /// Kind of data served.
        catalog_type: CatalogType,
        /// Connector provider name, e.g. `hadoop`.
        provider: String,
    },
    /// A schema.
    Schema,
    /// A table.
    Table {
        /// Columns in declaration order.
        #[serde(default)]
        columns: Vec<Column>,
        /// Partitioning expressions.
        #[serde(default)]
        partitioning: Vec<String>,
    },
    /// A fileset.
    Fileset {
        /// Managed or external.
        fileset_type: FilesetType,
        /// Primary storage location.
        #[serde(default)]
        storage_location: Option<String>,
    },
}

impl EntityKind {
    /// Returns the discriminant.
    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        match self {
            Self::Metalake => EntityType::Metalake,
            Self::Catalog { .. } => EntityType::Catalog,
            Self::Schema => EntityType::Schema,
            Self::Table { .. } => EntityType::Table,
            Self::Fileset { .. } => EntityType::Fileset,
        }
    }
}

/// Who created and last changed an entity, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditInfo {
    /// Principal that created the entity.
    pub creator: String,
    /// Creation time in milliseconds since the Unix epoch.
    pub create_time: u64,
    /// Principal of the latest alteration.
    #[serde(default)]
    pub last_modifier: Option<String>,
    /// Time of the latest alteration.
    #[serde(default)]
    pub last_modified_time: Option<u64>,
}

impl AuditInfo {
    /// Audit information for a fresh entity.
    #[must_use]
    pub fn created(creator: impl Into<String>, at: u64) -> Self {
        Self {
            creator: creator.into(),
            create_time: at,
            last_modifier: None,
            last_modified_time: None,
        }
    }

    /// Records an alteration.
    pub fn touch(&mut self, modifier: impl Into<String>, at: u64) {
        self.last_modifier = Some(modifier.into());
        self.last_modified_time = Some(at);
    }
}

/// A stored catalog object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Generated id, stable across renames.
    pub id: EntityId,
    /// Current name.
    pub name: NameIdentifier,
    /// Free-form comment.
    #[serde(default)]
    pub comment: Option<String>,
    /// String properties, including the embedded string identifier.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Audit information.
    pub audit: AuditInfo,
    /// Type-specific attributes.
    pub kind: EntityKind,
}

impl Entity {
    /// Returns the entity's type.
    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        self.kind.entity_type()
    }

    /// Returns the string identifier embedded in the properties.
    #[must_use]
    pub fn string_identifier(&self) -> Option<StringIdentifier> {
        StringIdentifier::from_properties(&self.properties)
            .ok()
            .flatten()
    }

    /// Returns the primary storage location of a fileset.
    #[must_use]
    pub fn storage_location(&self) -> Option<&str> {
        match &self.kind {
            EntityKind::Fileset {
                storage_location, ..
            } => storage_location.as_deref(),
            _ => None,
        }
    }

    /// Returns the backup storage locations of a fileset, keyed by property
    /// name.
    #[must_use]
    pub fn backup_locations(&self) -> BTreeMap<&str, &str> {
        if self.entity_type() != EntityType::Fileset {
            return BTreeMap::new();
        }
        self.properties
            .range(BACKUP_STORAGE_LOCATION_PREFIX.to_string()..)
            .take_while(|(k, _)| k.starts_with(BACKUP_STORAGE_LOCATION_PREFIX))
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    /// Returns the columns of a table.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        match &self.kind {
            EntityKind::Table { columns, .. } => columns,
            _ => &[],
        }
    }
}

/// Attributes of an entity to create.
///
/// The store assigns the id, the audit information and the name.
///
/// # Example
///
/// ```rust
/// use lakemeta_core::{FilesetType, NewEntity};
///
/// let fileset = NewEntity::fileset(FilesetType::Managed, None)
///     .with_comment("raw events")
///     .with_property("owner", "analytics")
///     .created_by("alice");
/// assert_eq!(fileset.creator, "alice");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntity {
    /// Comment.
    pub comment: Option<String>,
    /// Properties, optionally carrying a string identifier.
    pub properties: BTreeMap<String, String>,
    /// Type-specific attributes.
    pub kind: EntityKind,
    /// Principal recorded as creator.
    pub creator: String,
}

impl NewEntity {
    /// Creates a request for the given kind.
    #[must_use]
    pub fn new(kind: EntityKind) -> Self {
        Self {
            comment: None,
            properties: BTreeMap::new(),
            kind,
            creator: "anonymous".to_string(),
        }
    }

    /// A metalake.
    #[must_use]
    pub fn metalake() -> Self {
        Self::new(EntityKind::Metalake)
    }

    /// A catalog.
    #[must_use]
    pub fn catalog(catalog_type: CatalogType, provider: impl Into<String>) -> Self {
        Self::new(EntityKind::Catalog {
            catalog_type,
            provider: provider.into(),
        })
    }

    /// A schema.
    #[must_use]
    pub fn schema() -> Self {
        Self::new(EntityKind::Schema)
    }

    /// A table.
    #[must_use]
    pub fn table(columns: Vec<Column>) -> Self {
        Self::new(EntityKind::Table {
            columns,
            partitioning: Vec::new(),
        })
    }

    /// A fileset. A managed fileset without a location derives one from
    /// its schema or catalog.
    #[must_use]
    pub fn fileset(fileset_type: FilesetType, storage_location: Option<String>) -> Self {
        Self::new(EntityKind::Fileset {
            fileset_type,
            storage_location,
        })
    }

    /// Sets the comment.
    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Replaces the properties.
    #[must_use]
    pub fn with_properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.properties = properties;
        self
    }

    /// Adds one property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Embeds a string identifier, making the create idempotent.
    #[must_use]
    pub fn with_string_identifier(mut self, sid: StringIdentifier) -> Self {
        self.properties = sid.new_properties_with_id(&self.properties);
        self
    }

    /// Sets the creator.
    #[must_use]
    pub fn created_by(mut self, creator: impl Into<String>) -> Self {
        self.creator = creator.into();
        self
    }

    /// Returns the type being created.
    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        self.kind.entity_type()
    }
}
