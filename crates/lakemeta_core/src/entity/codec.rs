//! Entity payload encoding.

use super::{Entity, EntityType};
use crate::error::{StoreError, StoreResult};
use lakemeta_codec::Format;
use std::fmt;

/// Converts entities to and from stored payloads.
pub trait EntitySerDe: Send + Sync + fmt::Debug {
    /// Encodes an entity.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the entity cannot be encoded.
    fn serialize(&self, entity: &Entity) -> StoreResult<Vec<u8>>;

    /// Decodes a payload that must hold an entity of `expected` type.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the payload is corrupt, unsupported or
    /// holds a different entity type.
    fn deserialize(&self, bytes: &[u8], expected: EntityType) -> StoreResult<Entity>;
}

/// Framed encoding that writes one format and reads every format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramedSerDe {
    write_format: Format,
}

impl FramedSerDe {
    /// Creates a serde that writes `write_format`.
    #[must_use]
    pub const fn new(write_format: Format) -> Self {
        Self { write_format }
    }

    /// Returns the format used for new payloads.
    #[must_use]
    pub const fn write_format(&self) -> Format {
        self.write_format
    }
}

impl EntitySerDe for FramedSerDe {
    fn serialize(&self, entity: &Entity) -> StoreResult<Vec<u8>> {
        Ok(lakemeta_codec::encode(self.write_format, entity)?)
    }

    fn deserialize(&self, bytes: &[u8], expected: EntityType) -> StoreResult<Entity> {
        let entity: Entity = lakemeta_codec::decode(bytes)?;
        if entity.entity_type() != expected {
            return Err(StoreError::serialization(format!(
                "expected {expected} payload, found {}",
                entity.entity_type()
            )));
        }
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{AuditInfo, CatalogType, Column, EntityKind, FilesetType};
    use crate::id::EntityId;
    use crate::ident::NameIdentifier;
    use std::collections::BTreeMap;

    fn entities() -> Vec<Entity> {
        let base = Entity {
            id: EntityId::new(11),
            name: NameIdentifier::parse("m1").unwrap(),
            comment: Some("metalake".into()),
            properties: BTreeMap::from([("k".to_string(), "v".to_string())]),
            audit: AuditInfo::created("alice", 1_700_000_000_000),
            kind: EntityKind::Metalake,
        };
        let mut altered = base.clone();
        altered.audit.touch("bob", 1_700_000_000_500);

        vec![
            base.clone(),
            altered,
            Entity {
                name: NameIdentifier::parse("m1.c1").unwrap(),
                kind: EntityKind::Catalog {
                    catalog_type: CatalogType::Fileset,
                    provider: "hadoop".into(),
                },
                ..base.clone()
            },
            Entity {
                name: NameIdentifier::parse("m1.c1.s1").unwrap(),
                comment: None,
                kind: EntityKind::Schema,
                ..base.clone()
            },
            Entity {
                name: NameIdentifier::parse("m1.c1.s1.t1").unwrap(),
                kind: EntityKind::Table {
                    columns: vec![Column::new("id", "bigint").with_comment("key")],
                    partitioning: vec!["day(ts)".into()],
                },
                ..base.clone()
            },
            Entity {
                name: NameIdentifier::parse("m1.c1.s1.f1").unwrap(),
                kind: EntityKind::Fileset {
                    fileset_type: FilesetType::External,
                    storage_location: Some("hdfs://nn/data".into()),
                },
                ..base
            },
        ]
    }

    #[test]
    fn every_kind_roundtrips_in_every_format() {
        for format in Format::ALL {
            let serde = FramedSerDe::new(format);
            for entity in entities() {
                let bytes = serde.serialize(&entity).unwrap();
                let decoded = serde.deserialize(&bytes, entity.entity_type()).unwrap();
                assert_eq!(decoded, entity, "{format}");
            }
        }
    }

    #[test]
    fn formats_coexist() {
        let entity = entities().remove(0);
        let json = FramedSerDe::new(Format::Json).serialize(&entity).unwrap();
        let reader = FramedSerDe::new(Format::Cbor);
        assert_eq!(
            reader.deserialize(&json, EntityType::Metalake).unwrap(),
            entity
        );
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let serde = FramedSerDe::default();
        let bytes = serde.serialize(&entities().remove(0)).unwrap();
        let err = serde.deserialize(&bytes, EntityType::Schema).unwrap_err();
        assert!(matches!(err, StoreError::Serialization { .. }));
    }

    #[test]
    fn corrupt_payload_is_rejected() {
        let serde = FramedSerDe::default();
        let mut bytes = serde.serialize(&entities().remove(0)).unwrap();
        bytes.truncate(bytes.len() / 2);
        assert!(matches!(
            serde.deserialize(&bytes, EntityType::Metalake),
            Err(StoreError::Serialization { .. })
        ));
    }

    #[test]
    fn payload_without_optional_fields_decodes() {
        let json = br#"{"id":5,"name":{"namespace":{"levels":["m1"]},"name":"c1"},"audit":{"creator":"alice","create_time":3},"kind":{"type":"Catalog","catalog_type":"Relational","provider":"jdbc"}}"#;
        let mut frame = vec![b'L', b'M', 1, Format::Json.code()];
        frame.extend_from_slice(json);

        let entity = FramedSerDe::default()
            .deserialize(&frame, EntityType::Catalog)
            .unwrap();
        assert_eq!(entity.id, EntityId::new(5));
        assert!(entity.properties.is_empty());
        assert_eq!(entity.comment, None);
        assert_eq!(entity.audit.last_modifier, None);
    }
}
