//! Retention and garbage collection through the store.

use lakemeta_core::{EntityChange, EntityType, NewEntity};
use lakemeta_testkit::prelude::*;
use std::time::Duration;

fn store() -> TestStore {
    init_test_logging();
    let store = TestStore::memory_with(
        TestStore::config()
            .delete_after(Duration::from_secs(60))
            .max_skew_time(Duration::from_secs(1)),
    );
    store.seed_schema().unwrap();
    store
}

fn retention() -> Duration {
    Duration::from_secs(61)
}

fn comment(store: &TestStore, text: &str) {
    store
        .alter(
            &ident("m1.c1.s1"),
            EntityType::Schema,
            "bob",
            &[EntityChange::update_comment(text)],
        )
        .unwrap();
}

#[test]
fn superseded_versions_survive_the_retention_window() {
    let store = store();
    let s1 = ident("m1.c1.s1");
    store.advance(Duration::from_millis(10));
    comment(&store, "v2");

    store.advance(retention() - Duration::from_millis(1));
    assert_eq!(store.collect_garbage().unwrap().versions_removed, 0);
    assert_eq!(store.versions(&s1, EntityType::Schema).unwrap().len(), 2);

    store.advance(Duration::from_millis(1));
    let stats = store.collect_garbage().unwrap();
    assert_eq!(stats.versions_removed, 1);
    assert_eq!(stats.entities_purged, 0);

    let versions = store.versions(&s1, EntityType::Schema).unwrap();
    assert_eq!(versions.len(), 1);
    let loaded = store.load(&s1, EntityType::Schema).unwrap();
    assert_eq!(loaded.comment.as_deref(), Some("v2"));
}

#[test]
fn collection_never_changes_reads() {
    let store = store();
    for i in 0..5 {
        store.advance(Duration::from_secs(30));
        comment(&store, &format!("v{i}"));
    }
    let before = store.load(&ident("m1.c1.s1"), EntityType::Schema).unwrap();
    store.advance(retention() * 3);
    store.collect_garbage().unwrap();
    assert_eq!(
        store.load(&ident("m1.c1.s1"), EntityType::Schema).unwrap(),
        before
    );
    assert!(store.exists(&ident("m1.c1"), EntityType::Catalog).unwrap());
}

#[test]
fn dropped_entities_are_purged_after_retention() {
    let store = store();
    store
        .create(&ident("m1.c1.s2"), NewEntity::schema())
        .unwrap();
    store.drop(&ident("m1.c1.s2"), EntityType::Schema, false).unwrap();

    store.advance(retention());
    let stats = store.collect_garbage().unwrap();
    assert_eq!(stats.entities_purged, 1);
    assert!(store
        .versions(&ident("m1.c1.s2"), EntityType::Schema)
        .unwrap()
        .is_empty());

    // Recreating after a purge starts a fresh history.
    store.create(&ident("m1.c1.s2"), NewEntity::schema()).unwrap();
    assert_eq!(
        store.versions(&ident("m1.c1.s2"), EntityType::Schema).unwrap().len(),
        1
    );
}

#[test]
fn tombstone_outlives_delete_after_by_the_skew_margin() {
    let store = store();
    let s2 = ident("m1.c1.s2");
    store.create(&s2, NewEntity::schema()).unwrap();
    store.drop(&s2, EntityType::Schema, false).unwrap();

    store.advance(Duration::from_secs(60));
    assert_eq!(store.collect_garbage().unwrap().versions_removed, 0);
    assert_eq!(store.versions(&s2, EntityType::Schema).unwrap().len(), 2);

    store.advance(Duration::from_secs(1));
    let stats = store.collect_garbage().unwrap();
    assert_eq!(stats.versions_removed, 2);
    assert_eq!(stats.entities_purged, 1);
}

#[test]
fn renamed_subtree_leaves_markers_until_retention() {
    let store = store();
    store
        .create(&ident("m1.c1.s1.t1"), NewEntity::table(vec![]))
        .unwrap();
    store
        .alter(
            &ident("m1.c1.s1"),
            EntityType::Schema,
            "bob",
            &[EntityChange::rename("s9")],
        )
        .unwrap();

    store.advance(retention());
    let stats = store.collect_garbage().unwrap();
    // Old schema and old table: live version plus rename marker each.
    assert_eq!(stats.versions_removed, 4);
    assert_eq!(stats.entities_purged, 2);
    assert!(store.exists(&ident("m1.c1.s9.t1"), EntityType::Table).unwrap());
}
