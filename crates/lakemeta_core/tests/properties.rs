//! Property-based checks of store behavior against a simple model.

use lakemeta_core::{EntityType, Namespace, NewEntity};
use lakemeta_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
enum Op {
    Create(String),
    Drop(String),
    Rename(String, String),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let name = prop::sample::select(vec!["a", "b", "c", "d"]).prop_map(str::to_string);
    prop_oneof![
        name.clone().prop_map(Op::Create),
        name.clone().prop_map(Op::Drop),
        (name.clone(), name).prop_map(|(from, to)| Op::Rename(from, to)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn list_matches_created_names(names in prop::collection::btree_set(name_strategy(), 0..12)) {
        let store = TestStore::memory();
        store.seed_schema().unwrap();
        for name in &names {
            store
                .create(&ident(&format!("m1.c1.s1.{name}")), NewEntity::table(vec![]))
                .unwrap();
        }

        let listed: Vec<String> = store
            .list(&Namespace::of(["m1", "c1", "s1"]).unwrap(), EntityType::Table)
            .unwrap()
            .into_iter()
            .map(|e| e.name.name().to_string())
            .collect();
        prop_assert_eq!(listed, names.into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn operations_agree_with_set_model(ops in prop::collection::vec(op_strategy(), 1..30)) {
        let store = TestStore::memory();
        store.seed_schema().unwrap();
        let ns = Namespace::of(["m1", "c1"]).unwrap();
        let mut model: BTreeSet<String> = BTreeSet::from(["s1".to_string()]);

        for op in ops {
            match op {
                Op::Create(name) => {
                    let result = store.create(&ident(&format!("m1.c1.{name}")), NewEntity::schema());
                    prop_assert_eq!(result.is_ok(), model.insert(name));
                }
                Op::Drop(name) => {
                    let dropped = store
                        .drop(&ident(&format!("m1.c1.{name}")), EntityType::Schema, true)
                        .unwrap();
                    prop_assert_eq!(dropped, model.remove(&name));
                }
                Op::Rename(from, to) => {
                    let result = store.alter(
                        &ident(&format!("m1.c1.{from}")),
                        EntityType::Schema,
                        "model",
                        &[lakemeta_core::EntityChange::rename(to.clone())],
                    );
                    let allowed = model.contains(&from) && (from == to || !model.contains(&to));
                    prop_assert_eq!(result.is_ok(), allowed);
                    if allowed {
                        model.remove(&from);
                        model.insert(to);
                    }
                }
            }

            let listed: BTreeSet<String> = store
                .list(&ns, EntityType::Schema)
                .unwrap()
                .into_iter()
                .map(|e| e.name.name().to_string())
                .collect();
            prop_assert_eq!(&listed, &model);
        }
    }

    #[test]
    fn random_alters_never_lose_the_entity(changes in prop::collection::vec(common_change_strategy(), 0..10)) {
        let store = TestStore::memory();
        store.seed_schema().unwrap();
        let s1 = ident("m1.c1.s1");
        let before = store.load(&s1, EntityType::Schema).unwrap();

        let after = store.alter(&s1, EntityType::Schema, "prop", &changes).unwrap();
        prop_assert_eq!(after.id, before.id);
        prop_assert_eq!(after.string_identifier(), before.string_identifier());
        prop_assert_eq!(store.load(&s1, EntityType::Schema).unwrap(), after);
    }
}
