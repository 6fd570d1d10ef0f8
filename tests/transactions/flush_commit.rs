//! Publishing part of a transaction before it ends

use crate::common::*;
use vellum::{PartitionScheme, Query, Resource, ResourceKey};

#[test]
fn flush_commit_publishes_without_ending_transaction() {
    let engine = engine();
    let tx = engine.begin().unwrap();
    tx.create(doc("1", "early")).unwrap();
    tx.flush_commit(&[]).unwrap();

    assert!(engine.get(&key("1")).unwrap().is_some());
    assert!(tx.state().is_active());

    tx.create(doc("2", "late")).unwrap();
    assert_eq!(tx.count(&Query::All).unwrap(), 2);
    assert!(engine.get(&key("2")).unwrap().is_none());

    tx.commit().unwrap();
    assert_eq!(ids(&engine.find(&Query::All).unwrap()), vec!["1", "2"]);
}

#[test]
fn rollback_after_flush_commit_keeps_published_work() {
    let engine = engine();
    let tx = engine.begin().unwrap();
    tx.create(doc("1", "published")).unwrap();
    tx.flush_commit(&[ALIAS.to_string()]).unwrap();
    tx.create(doc("2", "discarded")).unwrap();
    tx.rollback().unwrap();

    assert_eq!(ids(&engine.find(&Query::All).unwrap()), vec!["1"]);
}

#[test]
fn flush_commit_limited_to_named_aliases() {
    let engine = engine();
    let other = ResourceKey::single("Note", "1", &PartitionScheme::Alias);
    let tx = engine.begin().unwrap();
    tx.create(doc("1", "doc")).unwrap();
    tx.create(Resource::new(other.clone()).text("body", "note")).unwrap();
    tx.flush_commit(&["Note".to_string()]).unwrap();

    assert!(engine.get(&other).unwrap().is_some());
    assert!(engine.get(&key("1")).unwrap().is_none());
    tx.commit().unwrap();
    assert!(engine.get(&key("1")).unwrap().is_some());
}

#[test]
fn flush_commit_of_a_delete() {
    let engine = engine();
    engine.transaction(|tx| tx.create(doc("1", "old"))).unwrap();

    let tx = engine.begin().unwrap();
    tx.delete(key("1")).unwrap();
    tx.flush_commit(&[]).unwrap();
    assert!(engine.get(&key("1")).unwrap().is_none());
    assert!(tx.get(&key("1")).unwrap().is_none());
    tx.commit().unwrap();
    assert!(engine.get(&key("1")).unwrap().is_none());
}
