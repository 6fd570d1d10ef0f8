//! Deletes hide committed documents from their own transaction only

use crate::common::*;
use vellum::Query;

fn seeded() -> vellum::SearchEngine {
    let engine = engine();
    engine
        .transaction(|tx| {
            tx.create(doc("1", "alpha"))?;
            tx.create(doc("2", "beta"))
        })
        .unwrap();
    engine
}

#[test]
fn deleted_resource_is_hidden_until_rollback() {
    let engine = seeded();
    let tx = engine.begin().unwrap();
    tx.delete(key("1")).unwrap();

    assert_eq!(ids(&tx.find(&Query::All).unwrap()), vec!["2"]);
    assert!(tx.get(&key("1")).unwrap().is_none());
    assert_eq!(ids(&engine.find(&Query::All).unwrap()), vec!["1", "2"]);

    tx.rollback().unwrap();
    assert!(engine.get(&key("1")).unwrap().is_some());
}

#[test]
fn deleted_resource_is_gone_after_commit() {
    let engine = seeded();
    let tx = engine.begin().unwrap();
    tx.delete(key("1")).unwrap();
    tx.commit().unwrap();
    assert_eq!(ids(&engine.find(&Query::All).unwrap()), vec!["2"]);
}

#[test]
fn delete_then_recreate_in_one_transaction() {
    let engine = seeded();
    let tx = engine.begin().unwrap();
    tx.delete(key("1")).unwrap();
    tx.create(doc("1", "reborn")).unwrap();
    assert_eq!(tx.get(&key("1")).unwrap().unwrap().value("body"), Some("reborn"));
    assert_eq!(tx.count(&Query::All).unwrap(), 2);
    tx.commit().unwrap();
    assert_eq!(engine.get(&key("1")).unwrap().unwrap().value("body"), Some("reborn"));
}

#[test]
fn delete_by_query_hides_every_match() {
    let engine = seeded();
    let tx = engine.begin().unwrap();
    tx.create(doc("3", "alpha again")).unwrap();
    tx.delete_by_query(Query::text("body", "alpha"), &[ALIAS.to_string()])
        .unwrap();
    assert_eq!(ids(&tx.find(&Query::All).unwrap()), vec!["2"]);
    tx.commit().unwrap();
    assert_eq!(ids(&engine.find(&Query::All).unwrap()), vec!["2"]);
}

#[test]
fn deleting_unknown_key_is_harmless() {
    let engine = seeded();
    let tx = engine.begin().unwrap();
    tx.delete(key("missing")).unwrap();
    assert_eq!(tx.count(&Query::All).unwrap(), 2);
    tx.commit().unwrap();
    assert_eq!(engine.find(&Query::All).unwrap().len(), 2);
}
