//! A transaction sees its own uncommitted writes

use crate::common::*;
use vellum::{Query, TransactionState};

#[test]
fn created_resource_is_visible_before_commit_and_after() {
    let engine = engine();
    let tx = engine.begin().unwrap();
    tx.create(doc("1", "hello world")).unwrap();

    assert_eq!(ids(&tx.find(&Query::alias(ALIAS)).unwrap()), vec!["1"]);
    assert_eq!(tx.get(&key("1")).unwrap().unwrap().value("body"), Some("hello world"));
    assert!(engine.get(&key("1")).unwrap().is_none());

    tx.commit().unwrap();
    let stored = engine.get(&key("1")).unwrap().unwrap();
    assert_eq!(stored.value("body"), Some("hello world"));
}

#[test]
fn update_replaces_committed_version() {
    let engine = engine();
    engine.transaction(|tx| tx.create(doc("1", "first"))).unwrap();

    let tx = engine.begin().unwrap();
    tx.update(doc("1", "second")).unwrap();
    assert_eq!(tx.count(&Query::All).unwrap(), 1);
    assert_eq!(tx.get(&key("1")).unwrap().unwrap().value("body"), Some("second"));
    assert_eq!(engine.get(&key("1")).unwrap().unwrap().value("body"), Some("first"));
    tx.commit().unwrap();

    assert_eq!(engine.find(&Query::All).unwrap().len(), 1);
    assert_eq!(engine.get(&key("1")).unwrap().unwrap().value("body"), Some("second"));
}

#[test]
fn text_query_matches_own_writes() {
    let engine = engine();
    let tx = engine.begin().unwrap();
    tx.create(doc("1", "Quick brown fox")).unwrap();
    tx.create(doc("2", "lazy dog")).unwrap();
    assert_eq!(ids(&tx.find(&Query::text("body", "fox")).unwrap()), vec!["1"]);
    assert!(tx.find(&Query::text("body", "cat")).unwrap().is_empty());
    tx.rollback().unwrap();
}

#[test]
fn two_phase_commit() {
    let engine = engine();
    let tx = engine.begin().unwrap();
    tx.create(doc("1", "staged")).unwrap();
    tx.prepare().unwrap();
    assert_eq!(tx.state(), TransactionState::Prepared);
    assert!(engine.get(&key("1")).unwrap().is_none());
    tx.commit_prepared().unwrap();
    assert!(engine.get(&key("1")).unwrap().is_some());
}

#[test]
fn commit_prepared_requires_prepare() {
    let engine = engine();
    let tx = engine.begin().unwrap();
    tx.create(doc("1", "x")).unwrap();
    assert!(matches!(
        tx.commit_prepared(),
        Err(vellum::Error::InvalidState { .. })
    ));
    // The dropped handle rolled back and released the writer
    engine.transaction(|tx| tx.create(doc("1", "y"))).unwrap();
    assert_eq!(engine.get(&key("1")).unwrap().unwrap().value("body"), Some("y"));
}
