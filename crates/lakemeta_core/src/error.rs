//! Error types for LakeMeta core.

use lakemeta_codec::CodecError;
use lakemeta_storage::StorageError;
use thiserror::Error;

use crate::entity::EntityType;
use crate::ident::NameIdentifier;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in entity store operations.
///
/// Messages for the not-found, already-exists and non-empty cases are part
/// of the public contract (`Schema m1.c1.schema16 does not exist`).
#[derive(Debug, Error)]
pub enum StoreError {
    /// No live entity exists under the identifier.
    #[error("{message}")]
    NotFound {
        /// Human-readable description.
        message: String,
    },

    /// A different live entity already occupies the identifier.
    #[error("{message}")]
    AlreadyExists {
        /// Human-readable description.
        message: String,
    },

    /// The entity has live children and cascade was not requested.
    #[error("{message}")]
    NonEmpty {
        /// Human-readable description.
        message: String,
    },

    /// A caller-supplied value is malformed or violates a rule.
    #[error("{message}")]
    InvalidArgument {
        /// Human-readable description.
        message: String,
    },

    /// The requested change is not supported for this entity.
    #[error("{message}")]
    UnsupportedOperation {
        /// Human-readable description.
        message: String,
    },

    /// A payload could not be encoded or decoded.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
    },

    /// The backend could not serve the request, or the store is closed.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(#[from] StorageError),

    /// A concurrent writer or clock skew prevented the mutation.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// No further identifiers can be issued.
    #[error("id generation failed: {message}")]
    IdGeneration {
        /// Description of the failure.
        message: String,
    },
}

impl From<CodecError> for StoreError {
    fn from(err: CodecError) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl StoreError {
    /// Create a not-found error for a typed identifier.
    pub fn not_found(entity_type: EntityType, ident: &NameIdentifier) -> Self {
        Self::NotFound {
            message: format!("{entity_type} {ident} does not exist"),
        }
    }

    /// Create an already-exists error for a typed identifier.
    pub fn already_exists(entity_type: EntityType, ident: &NameIdentifier) -> Self {
        Self::AlreadyExists {
            message: format!("{entity_type} {ident} already exists"),
        }
    }

    /// Create a non-empty error for a typed identifier.
    pub fn non_empty(entity_type: EntityType, ident: &NameIdentifier) -> Self {
        Self::NonEmpty {
            message: format!("{entity_type} {ident} is not empty"),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an unsupported operation error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            message: message.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create an id generation error.
    pub fn id_generation(message: impl Into<String>) -> Self {
        Self::IdGeneration {
            message: message.into(),
        }
    }

    /// Returns true for [`StoreError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true for [`StoreError::AlreadyExists`].
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_type_and_identifier() {
        let ident = NameIdentifier::parse("m1.c1.schema11").unwrap();
        assert_eq!(
            StoreError::already_exists(EntityType::Schema, &ident).to_string(),
            "Schema m1.c1.schema11 already exists"
        );
        assert_eq!(
            StoreError::not_found(EntityType::Schema, &ident).to_string(),
            "Schema m1.c1.schema11 does not exist"
        );
        assert_eq!(
            StoreError::non_empty(EntityType::Schema, &ident).to_string(),
            "Schema m1.c1.schema11 is not empty"
        );
    }

    #[test]
    fn lower_errors_convert() {
        let err: StoreError = StorageError::Closed.into();
        assert!(matches!(err, StoreError::BackendUnavailable(StorageError::Closed)));

        let err: StoreError = CodecError::UnsupportedFormat { code: 9 }.into();
        assert!(matches!(err, StoreError::Serialization { .. }));
    }
}
