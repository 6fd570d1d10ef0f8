//! Property-based tests over random operation sequences

use crate::common::*;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use vellum::{Query, Resource};

#[derive(Debug, Clone)]
enum Op {
    Upsert(u8, u16),
    Delete(u8),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u8..6, any::<u16>()).prop_map(|(id, v)| Op::Upsert(id, v)),
        1 => (0u8..6).prop_map(Op::Delete),
    ]
}

fn body(v: u16) -> String {
    format!("v{}", v)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Jobs for one resource apply in submission order regardless of worker
    /// count, both inside the transaction and after commit.
    #[test]
    fn final_state_matches_sequential_model(
        ops in prop::collection::vec(arb_op(), 1..40),
        workers in 1usize..6,
    ) {
        let engine = engine_with(|c| c.transaction.concurrency_level = workers);
        let mut model: BTreeMap<String, String> = BTreeMap::new();

        let tx = engine.begin().unwrap();
        for op in &ops {
            match op {
                Op::Upsert(id, v) => {
                    let id = id.to_string();
                    tx.update(Resource::new(key(&id)).text("body", body(*v))).unwrap();
                    model.insert(id, body(*v));
                }
                Op::Delete(id) => {
                    let id = id.to_string();
                    tx.delete(key(&id)).unwrap();
                    model.remove(&id);
                }
            }
        }

        let expected: Vec<String> = model.keys().cloned().collect();
        prop_assert_eq!(ids(&tx.find(&Query::All).unwrap()), expected.clone());
        tx.commit().unwrap();
        prop_assert_eq!(ids(&engine.find(&Query::All).unwrap()), expected);
        for (id, value) in &model {
            let stored = engine.get(&key(id)).unwrap().unwrap();
            prop_assert_eq!(stored.value("body"), Some(value.as_str()));
        }
    }

    /// Each delete hides exactly its resource from the deleting transaction
    /// and nothing from anyone else.
    #[test]
    fn deletes_only_shrink_the_private_view(
        deletes in prop::collection::vec(0u8..10, 1..15),
    ) {
        let engine = engine();
        engine
            .transaction(|tx| {
                for n in 0..10 {
                    tx.create(doc(&n.to_string(), "seed"))?;
                }
                Ok(())
            })
            .unwrap();

        let tx = engine.begin().unwrap();
        let mut gone = BTreeSet::new();
        let mut previous = 10;
        for id in deletes {
            tx.delete(key(&id.to_string())).unwrap();
            gone.insert(id);
            let visible = tx.count(&Query::All).unwrap();
            prop_assert!(visible <= previous);
            prop_assert_eq!(visible, 10 - gone.len());
            prop_assert_eq!(engine.find(&Query::All).unwrap().len(), 10);
            previous = visible;
        }
        tx.rollback().unwrap();
        prop_assert_eq!(engine.find(&Query::All).unwrap().len(), 10);
    }
}
