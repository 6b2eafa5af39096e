//! Property-based test generators using proptest.
//!
//! Generated names avoid the reserved characters, so every value is a
//! valid identifier component.

use lakemeta_core::{
    CatalogType, Column, EntityChange, FilesetType, NameIdentifier, Namespace, NewEntity,
};
use proptest::prelude::*;

/// Strategy for valid identifier components.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,11}").expect("Invalid regex")
}

/// Strategy for namespaces of exactly `depth` levels.
pub fn namespace_strategy(depth: usize) -> impl Strategy<Value = Namespace> {
    prop::collection::vec(name_strategy(), depth).prop_map(|levels| {
        if levels.is_empty() {
            Namespace::root()
        } else {
            Namespace::of(levels).expect("Generated levels are valid")
        }
    })
}

/// Strategy for identifiers whose namespace has `depth` levels.
pub fn identifier_strategy(depth: usize) -> impl Strategy<Value = NameIdentifier> {
    (namespace_strategy(depth), name_strategy())
        .prop_map(|(ns, name)| NameIdentifier::of(ns, name).expect("Generated name is valid"))
}

/// Strategy for string properties without reserved keys.
pub fn properties_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec(
        (
            prop::string::string_regex("[a-z][a-z0-9.-]{0,15}").expect("Invalid regex"),
            prop::string::string_regex("[ -~]{0,24}").expect("Invalid regex"),
        ),
        0..6,
    )
    .prop_map(|pairs| {
        pairs
            .into_iter()
            .filter(|(k, _)| !k.starts_with("lakemeta.") && !k.starts_with("backup-storage-location-"))
            .collect()
    })
}

/// Strategy for catalog creation requests.
pub fn catalog_strategy() -> impl Strategy<Value = NewEntity> {
    (
        prop_oneof![
            Just(CatalogType::Relational),
            Just(CatalogType::Fileset),
            Just(CatalogType::Messaging),
        ],
        name_strategy(),
        properties_strategy(),
        prop::option::of("[ -~]{0,32}"),
    )
        .prop_map(|(catalog_type, provider, properties, comment)| {
            let mut new = NewEntity::catalog(catalog_type, provider);
            for (k, v) in properties {
                new = new.with_property(k, v);
            }
            new.comment = comment;
            new
        })
}

/// Strategy for table creation requests.
pub fn table_strategy() -> impl Strategy<Value = NewEntity> {
    prop::collection::btree_set(name_strategy(), 0..6).prop_map(|names| {
        NewEntity::table(
            names
                .into_iter()
                .map(|name| Column::new(name, "string"))
                .collect(),
        )
    })
}

/// Strategy for external fileset creation requests.
pub fn fileset_strategy() -> impl Strategy<Value = NewEntity> {
    name_strategy().prop_map(|dir| {
        NewEntity::fileset(FilesetType::External, Some(format!("hdfs://nn/data/{dir}")))
    })
}

/// Strategy for changes valid on any entity type.
pub fn common_change_strategy() -> impl Strategy<Value = EntityChange> {
    prop_oneof![
        (name_strategy(), "[ -~]{0,16}").prop_map(|(k, v)| EntityChange::set_property(k, v)),
        name_strategy()
            .prop_filter("owner cannot be removed", |k| k != "owner")
            .prop_map(EntityChange::remove_property),
        "[ -~]{0,32}".prop_map(EntityChange::update_comment),
        Just(EntityChange::remove_comment()),
    ]
}
