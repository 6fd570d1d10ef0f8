//! Uncommitted work stays private to its transaction

use crate::common::*;
use std::sync::Arc;
use std::thread;
use vellum::{Error, PartitionScheme, Query, Resource, ResourceKey};

fn note(id: &str) -> Resource {
    Resource::new(ResourceKey::single("Note", id, &PartitionScheme::Alias)).text("body", "note")
}

#[test]
fn concurrent_transactions_do_not_see_each_other() {
    let engine = engine();
    let docs = engine.begin().unwrap();
    let notes = engine.begin().unwrap();

    docs.create(doc("1", "doc")).unwrap();
    notes.create(note("1")).unwrap();

    assert_eq!(docs.count(&Query::All).unwrap(), 1);
    assert!(docs.find(&Query::alias("Note")).unwrap().is_empty());
    assert!(notes.find(&Query::alias(ALIAS)).unwrap().is_empty());

    docs.commit().unwrap();
    // Committed work is visible to transactions still running
    assert_eq!(notes.find(&Query::alias(ALIAS)).unwrap().len(), 1);
    assert_eq!(notes.count(&Query::All).unwrap(), 2);
    notes.rollback().unwrap();

    assert_eq!(engine.find(&Query::All).unwrap().len(), 1);
}

#[test]
fn pending_delete_is_invisible_to_other_readers() {
    let engine = engine();
    engine.transaction(|tx| tx.create(doc("1", "kept"))).unwrap();

    let deleter = engine.begin().unwrap();
    deleter.delete(key("1")).unwrap();
    deleter.flush().unwrap();

    let reader = engine.begin_with(vellum::ProcessorKind::SearchOnly).unwrap();
    assert!(reader.get(&key("1")).unwrap().is_some());
    reader.commit().unwrap();

    deleter.commit().unwrap();
    assert!(engine.get(&key("1")).unwrap().is_none());
}

#[test]
fn second_writer_on_a_partition_times_out() {
    let engine = engine_with(|c| c.index.lock_timeout_ms = 100);
    let first = engine.begin().unwrap();
    first.create(doc("1", "first")).unwrap();

    let second = engine.begin().unwrap();
    let err = second.create(doc("2", "second")).unwrap_err();
    assert!(matches!(err, Error::StorageOpen { .. }));
    second.rollback().unwrap();

    first.commit().unwrap();
    assert_eq!(ids(&engine.find(&Query::All).unwrap()), vec!["1"]);
}

#[test]
fn writers_on_disjoint_partitions_run_in_parallel() {
    let engine = Arc::new(engine());
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let alias = format!("Part{}", t);
                engine
                    .transaction(|tx| {
                        for n in 0..25 {
                            let key = ResourceKey::single(
                                alias.as_str(),
                                n.to_string(),
                                &PartitionScheme::Alias,
                            );
                            tx.create(Resource::new(key).text("body", "parallel"))?;
                        }
                        Ok(())
                    })
                    .unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(engine.find(&Query::text("body", "parallel")).unwrap().len(), 100);
    assert_eq!(engine.find(&Query::alias("Part2")).unwrap().len(), 25);
}
