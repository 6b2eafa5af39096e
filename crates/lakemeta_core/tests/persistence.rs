//! Durability across restarts of the log backend.

use lakemeta_core::{
    Config, EntityChange, EntityStore, EntityType, Format, IdStrategy, NewEntity, StoreError,
};
use lakemeta_storage::StorageError;
use lakemeta_testkit::prelude::*;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn entities_survive_reopen() {
    init_test_logging();
    let store = TestStore::log();
    store.seed_schema().unwrap();
    store
        .alter(
            &ident("m1.c1.s1"),
            EntityType::Schema,
            "bob",
            &[EntityChange::set_property("k", "v")],
        )
        .unwrap();
    let before = store.load(&ident("m1.c1.s1"), EntityType::Schema).unwrap();

    let store = store.reopen();
    let after = store.load(&ident("m1.c1.s1"), EntityType::Schema).unwrap();
    assert_eq!(after, before);
    assert_eq!(store.load_by_id(before.id).unwrap(), before);
    assert_eq!(
        store.versions(&ident("m1.c1.s1"), EntityType::Schema).unwrap().len(),
        2
    );
}

#[test]
fn sequential_ids_never_repeat_across_reopen() {
    init_test_logging();
    let store = TestStore::log_with(TestStore::config().id_strategy(IdStrategy::Sequential));
    store.seed_schema().unwrap();
    let schema = store.load(&ident("m1.c1.s1"), EntityType::Schema).unwrap();
    assert!(store.drop(&ident("m1.c1.s1"), EntityType::Schema, false).unwrap());

    let store = store.reopen();
    let recreated = store.create(&ident("m1.c1.s1"), NewEntity::schema()).unwrap();
    assert!(recreated.id > schema.id);
}

#[test]
fn payload_formats_coexist() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let config = |format: Format| {
        Config::new()
            .path(dir.path())
            .gc_interval(None)
            .sync_on_commit(false)
            .serde_format(format)
    };

    let store = EntityStore::open(config(Format::Json)).unwrap();
    seed_schema(&store, "m1", "c1", "s1").unwrap();
    store.close().unwrap();
    drop(store);

    let store = EntityStore::open(config(Format::Cbor)).unwrap();
    store
        .alter(
            &ident("m1.c1"),
            EntityType::Catalog,
            "bob",
            &[EntityChange::update_comment("cbor")],
        )
        .unwrap();
    let schema = store.load(&ident("m1.c1.s1"), EntityType::Schema).unwrap();
    assert_eq!(schema.name, ident("m1.c1.s1"));
    assert_eq!(
        store
            .load(&ident("m1.c1"), EntityType::Catalog)
            .unwrap()
            .comment
            .as_deref(),
        Some("cbor")
    );
}

#[test]
fn second_open_of_same_directory_fails() {
    let dir = TempDir::new().unwrap();
    let config = Config::new().path(dir.path()).gc_interval(None);
    let _first = EntityStore::open(config.clone()).unwrap();
    let err = EntityStore::open(config).unwrap_err();
    assert!(matches!(
        err,
        StoreError::BackendUnavailable(StorageError::Locked { .. })
    ));
}

#[test]
fn background_gc_starts_and_stops_with_store() {
    let dir = TempDir::new().unwrap();
    let store = EntityStore::open(
        Config::new()
            .path(dir.path())
            .gc_interval(Some(Duration::from_millis(5))),
    )
    .unwrap();
    seed_schema(&store, "m1", "c1", "s1").unwrap();
    std::thread::sleep(Duration::from_millis(30));
    store.close().unwrap();
    assert!(store.is_closed());
}

#[test]
fn unknown_backend_is_reported() {
    let err = EntityStore::open(Config::in_memory().backend("rocks")).unwrap_err();
    assert!(matches!(
        err,
        StoreError::BackendUnavailable(StorageError::UnknownBackend { .. })
    ));
}
