//! Alteration requests.
//!
//! An alteration is an ordered list of [`EntityChange`]s applied in memory
//! against the accumulated state. The first invalid change aborts the
//! whole alteration before anything is written.

use super::{Column, Entity, EntityKind, EntityType};
use crate::error::{StoreError, StoreResult};
use crate::ident::{NameIdentifier, ID_PROPERTY_KEY};

/// Property that may be set or replaced but never removed.
pub const OWNER_PROPERTY: &str = "owner";

/// Prefix of fileset properties holding backup storage locations.
pub const BACKUP_STORAGE_LOCATION_PREFIX: &str = "backup-storage-location-";

/// One change in an alteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityChange {
    /// Set or replace a property.
    SetProperty {
        /// Property key.
        key: String,
        /// New value.
        value: String,
    },
    /// Remove a property; removing an absent key is a no-op.
    RemoveProperty {
        /// Property key.
        key: String,
    },
    /// Replace the comment.
    UpdateComment {
        /// New comment.
        comment: String,
    },
    /// Clear the comment.
    RemoveComment,
    /// Change the leaf name. The id is unchanged.
    Rename {
        /// New leaf name.
        new_name: String,
    },
    /// Replace a fileset's primary storage location.
    UpdatePrimaryStorageLocation {
        /// New location.
        location: String,
    },
    /// Add a fileset backup location under a new key.
    AddBackupStorageLocation {
        /// Property key with the backup prefix.
        key: String,
        /// Location.
        location: String,
    },
    /// Replace an existing fileset backup location.
    UpdateBackupStorageLocation {
        /// Property key with the backup prefix.
        key: String,
        /// New location.
        location: String,
    },
    /// Remove an existing fileset backup location.
    RemoveBackupStorageLocation {
        /// Property key with the backup prefix.
        key: String,
    },
    /// Swap the locations held by two backup keys.
    SwitchBackupStorageLocation {
        /// First backup key.
        first: String,
        /// Second backup key.
        second: String,
    },
    /// Swap the primary location with a backup location.
    SwitchPrimaryAndBackupStorageLocation {
        /// Backup key.
        key: String,
    },
    /// Append a table column.
    AddColumn {
        /// The column.
        column: Column,
    },
    /// Remove a table column.
    DeleteColumn {
        /// Column name.
        name: String,
        /// Succeed when the column is absent.
        if_exists: bool,
    },
    /// Replace a table column's comment.
    UpdateColumnComment {
        /// Column name.
        name: String,
        /// New comment.
        comment: String,
    },
}

impl EntityChange {
    /// Sets a property.
    #[must_use]
    pub fn set_property(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::SetProperty {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Removes a property.
    #[must_use]
    pub fn remove_property(key: impl Into<String>) -> Self {
        Self::RemoveProperty { key: key.into() }
    }

    /// Replaces the comment.
    #[must_use]
    pub fn update_comment(comment: impl Into<String>) -> Self {
        Self::UpdateComment {
            comment: comment.into(),
        }
    }

    /// Clears the comment.
    #[must_use]
    pub fn remove_comment() -> Self {
        Self::RemoveComment
    }

    /// Renames the entity.
    #[must_use]
    pub fn rename(new_name: impl Into<String>) -> Self {
        Self::Rename {
            new_name: new_name.into(),
        }
    }

    /// Replaces the primary storage location.
    #[must_use]
    pub fn update_primary_storage_location(location: impl Into<String>) -> Self {
        Self::UpdatePrimaryStorageLocation {
            location: location.into(),
        }
    }

    /// Adds a backup storage location.
    #[must_use]
    pub fn add_backup_storage_location(key: impl Into<String>, location: impl Into<String>) -> Self {
        Self::AddBackupStorageLocation {
            key: key.into(),
            location: location.into(),
        }
    }

    /// Replaces a backup storage location.
    #[must_use]
    pub fn update_backup_storage_location(
        key: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self::UpdateBackupStorageLocation {
            key: key.into(),
            location: location.into(),
        }
    }

    /// Removes a backup storage location.
    #[must_use]
    pub fn remove_backup_storage_location(key: impl Into<String>) -> Self {
        Self::RemoveBackupStorageLocation { key: key.into() }
    }

    /// Swaps two backup storage locations.
    #[must_use]
    pub fn switch_backup_storage_location(
        first: impl Into<String>,
        second: impl Into<String>,
    ) -> Self {
        Self::SwitchBackupStorageLocation {
            first: first.into(),
            second: second.into(),
        }
    }

    /// Swaps the primary location with a backup location.
    #[must_use]
    pub fn switch_primary_and_backup_storage_location(key: impl Into<String>) -> Self {
        Self::SwitchPrimaryAndBackupStorageLocation { key: key.into() }
    }

    /// Appends a column.
    #[must_use]
    pub fn add_column(column: Column) -> Self {
        Self::AddColumn { column }
    }

    /// Removes a column.
    #[must_use]
    pub fn delete_column(name: impl Into<String>, if_exists: bool) -> Self {
        Self::DeleteColumn {
            name: name.into(),
            if_exists,
        }
    }

    /// Replaces a column comment.
    #[must_use]
    pub fn update_column_comment(name: impl Into<String>, comment: impl Into<String>) -> Self {
        Self::UpdateColumnComment {
            name: name.into(),
            comment: comment.into(),
        }
    }

    /// Checks the parts of the change that do not depend on current state.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedOperation` if the change does not apply to
    /// `entity_type` or removes the owner, and `InvalidArgument` for
    /// malformed keys or names.
    pub fn validate(&self, entity_type: EntityType) -> StoreResult<()> {
        match self {
            Self::SetProperty { key, .. } => {
                if key.is_empty() {
                    return Err(StoreError::invalid_argument("Property key cannot be empty"));
                }
                reject_reserved(key)
            }
            Self::RemoveProperty { key } => {
                if key == OWNER_PROPERTY {
                    return Err(StoreError::unsupported(format!(
                        "Property {OWNER_PROPERTY} cannot be removed"
                    )));
                }
                reject_reserved(key)
            }
            Self::UpdateComment { .. } | Self::RemoveComment => Ok(()),
            Self::Rename { new_name } => NameIdentifier::parse(new_name)
                .ok()
                .filter(|ident| ident.namespace().is_root())
                .map(|_| ())
                .ok_or_else(|| StoreError::invalid_argument(format!("Invalid name '{new_name}'"))),
            Self::UpdatePrimaryStorageLocation { location } => {
                require_type(self, entity_type, EntityType::Fileset)?;
                require_location(location)
            }
            Self::AddBackupStorageLocation { key, location }
            | Self::UpdateBackupStorageLocation { key, location } => {
                require_type(self, entity_type, EntityType::Fileset)?;
                require_backup_key(key)?;
                require_location(location)
            }
            Self::RemoveBackupStorageLocation { key }
            | Self::SwitchPrimaryAndBackupStorageLocation { key } => {
                require_type(self, entity_type, EntityType::Fileset)?;
                require_backup_key(key)
            }
            Self::SwitchBackupStorageLocation { first, second } => {
                require_type(self, entity_type, EntityType::Fileset)?;
                require_backup_key(first)?;
                require_backup_key(second)
            }
            Self::AddColumn { column } => {
                require_type(self, entity_type, EntityType::Table)?;
                if column.name.is_empty() {
                    return Err(StoreError::invalid_argument("Column name cannot be empty"));
                }
                Ok(())
            }
            Self::DeleteColumn { .. } | Self::UpdateColumnComment { .. } => {
                require_type(self, entity_type, EntityType::Table)
            }
        }
    }

    /// Applies the change to `entity`.
    ///
    /// A rename only updates `entity.name`; relocating stored versions is
    /// the store's job.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`EntityChange::validate`], plus
    /// `InvalidArgument` when the change references state that does not
    /// exist (or already exists) on `entity`.
    pub fn apply(&self, entity: &mut Entity) -> StoreResult<()> {
        self.validate(entity.entity_type())?;

        match self {
            Self::SetProperty { key, value } => {
                entity.properties.insert(key.clone(), value.clone());
            }
            Self::RemoveProperty { key } => {
                entity.properties.remove(key);
            }
            Self::UpdateComment { comment } => entity.comment = Some(comment.clone()),
            Self::RemoveComment => entity.comment = None,
            Self::Rename { new_name } => entity.name = entity.name.with_name(new_name.clone())?,
            Self::UpdatePrimaryStorageLocation { location } => {
                *primary_location(entity)? = Some(location.clone());
            }
            Self::AddBackupStorageLocation { key, location } => {
                if entity.properties.contains_key(key) {
                    return Err(StoreError::invalid_argument(format!(
                        "Backup storage location {key} already exists for fileset {}",
                        entity.name
                    )));
                }
                entity.properties.insert(key.clone(), location.clone());
            }
            Self::UpdateBackupStorageLocation { key, location } => {
                *existing_backup(entity, key)? = location.clone();
            }
            Self::RemoveBackupStorageLocation { key } => {
                existing_backup(entity, key)?;
                entity.properties.remove(key);
            }
            Self::SwitchBackupStorageLocation { first, second } => {
                let first_location = existing_backup(entity, first)?.clone();
                let second_location =
                    std::mem::replace(existing_backup(entity, second)?, first_location);
                *existing_backup(entity, first)? = second_location;
            }
            Self::SwitchPrimaryAndBackupStorageLocation { key } => {
                let name = entity.name.to_string();
                let backup = existing_backup(entity, key)?.clone();
                let primary = primary_location(entity)?
                    .replace(backup)
                    .ok_or_else(|| {
                        StoreError::invalid_argument(format!(
                            "Fileset {name} has no primary storage location"
                        ))
                    })?;
                *existing_backup(entity, key)? = primary;
            }
            Self::AddColumn { column } => {
                let columns = table_columns(entity)?;
                if columns.iter().any(|c| c.name == column.name) {
                    return Err(StoreError::invalid_argument(format!(
                        "Column {} already exists",
                        column.name
                    )));
                }
                columns.push(column.clone());
            }
            Self::DeleteColumn { name, if_exists } => {
                let columns = table_columns(entity)?;
                let before = columns.len();
                columns.retain(|c| &c.name != name);
                if columns.len() == before && !if_exists {
                    return Err(StoreError::invalid_argument(format!(
                        "Column {name} does not exist"
                    )));
                }
            }
            Self::UpdateColumnComment { name, comment } => {
                let column = table_columns(entity)?
                    .iter_mut()
                    .find(|c| &c.name == name)
                    .ok_or_else(|| {
                        StoreError::invalid_argument(format!("Column {name} does not exist"))
                    })?;
                column.comment = Some(comment.clone());
            }
        }
        Ok(())
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::SetProperty { .. } => "set property",
            Self::RemoveProperty { .. } => "remove property",
            Self::UpdateComment { .. } => "update comment",
            Self::RemoveComment => "remove comment",
            Self::Rename { .. } => "rename",
            Self::UpdatePrimaryStorageLocation { .. } => "update primary storage location",
            Self::AddBackupStorageLocation { .. } => "add backup storage location",
            Self::UpdateBackupStorageLocation { .. } => "update backup storage location",
            Self::RemoveBackupStorageLocation { .. } => "remove backup storage location",
            Self::SwitchBackupStorageLocation { .. } => "switch backup storage location",
            Self::SwitchPrimaryAndBackupStorageLocation { .. } => {
                "switch primary and backup storage location"
            }
            Self::AddColumn { .. } => "add column",
            Self::DeleteColumn { .. } => "delete column",
            Self::UpdateColumnComment { .. } => "update column comment",
        }
    }
}

fn reject_reserved(key: &str) -> StoreResult<()> {
    if key == ID_PROPERTY_KEY {
        return Err(StoreError::invalid_argument(format!(
            "Property {ID_PROPERTY_KEY} is reserved"
        )));
    }
    Ok(())
}

fn require_type(change: &EntityChange, actual: EntityType, expected: EntityType) -> StoreResult<()> {
    if actual != expected {
        return Err(StoreError::unsupported(format!(
            "Change '{}' is not supported for {actual}",
            change.describe()
        )));
    }
    Ok(())
}

fn require_location(location: &str) -> StoreResult<()> {
    if location.trim().is_empty() {
        return Err(StoreError::invalid_argument("Storage location cannot be empty"));
    }
    Ok(())
}

fn require_backup_key(key: &str) -> StoreResult<()> {
    match key.strip_prefix(BACKUP_STORAGE_LOCATION_PREFIX) {
        Some(suffix) if !suffix.is_empty() => Ok(()),
        _ => Err(StoreError::invalid_argument(format!(
            "Backup storage location key must start with {BACKUP_STORAGE_LOCATION_PREFIX}: {key}"
        ))),
    }
}

fn existing_backup<'a>(entity: &'a mut Entity, key: &str) -> StoreResult<&'a mut String> {
    let name = entity.name.to_string();
    entity.properties.get_mut(key).ok_or_else(|| {
        StoreError::invalid_argument(format!(
            "Backup storage location {key} does not exist for fileset {name}"
        ))
    })
}

fn primary_location(entity: &mut Entity) -> StoreResult<&mut Option<String>> {
    match &mut entity.kind {
        EntityKind::Fileset {
            storage_location, ..
        } => Ok(storage_location),
        other => Err(StoreError::unsupported(format!(
            "{} has no storage location",
            other.entity_type()
        ))),
    }
}

fn table_columns(entity: &mut Entity) -> StoreResult<&mut Vec<Column>> {
    match &mut entity.kind {
        EntityKind::Table { columns, .. } => Ok(columns),
        other => Err(StoreError::unsupported(format!(
            "{} has no columns",
            other.entity_type()
        ))),
    }
}
