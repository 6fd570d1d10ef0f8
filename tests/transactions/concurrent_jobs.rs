//! Background job workers behind the read-committed processor

use crate::common::*;
use std::time::Duration;
use vellum::{Error, Hashing, Query, Resource};

#[test]
fn last_submitted_version_of_each_resource_wins() {
    let engine = engine_with(|c| {
        c.transaction.concurrency_level = 5;
        c.transaction.backlog = 8;
    });
    let tx = engine.begin().unwrap();
    for n in 0..100 {
        let id = (n % 10).to_string();
        tx.update(Resource::new(key(&id)).text("body", format!("v{}", n)))
            .unwrap();
    }
    tx.flush().unwrap();
    assert_eq!(tx.count(&Query::All).unwrap(), 10);
    tx.commit().unwrap();

    for id in 0..10 {
        let stored = engine.get(&key(&id.to_string())).unwrap().unwrap();
        let expected = format!("v{}", 90 + id);
        assert_eq!(stored.value("body"), Some(expected.as_str()));
    }
}

#[test]
fn full_backlog_times_out_and_transaction_can_roll_back() {
    let gate = GatedExecutor::new();
    let engine = engine_with(|c| {
        c.transaction.concurrency_level = 1;
        c.transaction.backlog = 1;
        c.transaction.add_timeout_ms = 50;
    })
    .with_job_executor(gate.clone());

    let tx = engine.begin().unwrap();
    tx.create(doc("1", "queued")).unwrap();
    assert_eq!(gate.held(), 1);

    let err = tx.create(doc("2", "rejected")).unwrap_err();
    assert!(matches!(err, Error::BacklogTimeout { worker: 0, .. }));

    gate.release();
    tx.rollback().unwrap();
    assert!(engine.find(&Query::All).unwrap().is_empty());
}

#[test]
fn retry_after_backlog_timeout_succeeds_once_workers_run() {
    let gate = GatedExecutor::new();
    let engine = engine_with(|c| {
        c.transaction.concurrency_level = 1;
        c.transaction.backlog = 1;
        c.transaction.add_timeout_ms = 50;
    })
    .with_job_executor(gate.clone());

    let tx = engine.begin().unwrap();
    tx.create(doc("1", "a")).unwrap();
    assert!(tx.create(doc("2", "b")).is_err());

    gate.release();
    let mut accepted = false;
    for _ in 0..40 {
        match tx.create(doc("2", "b")) {
            Ok(()) => {
                accepted = true;
                break;
            }
            Err(Error::BacklogTimeout { .. }) => continue,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert!(accepted);
    tx.commit().unwrap();
    assert_eq!(ids(&engine.find(&Query::All).unwrap()), vec!["1", "2"]);
}

#[test]
fn inline_mode_applies_jobs_on_caller_thread() {
    let engine = engine_with(|c| c.transaction.concurrent_operations = false);
    let tx = engine.begin().unwrap();
    for n in 0..20 {
        tx.create(doc(&n.to_string(), "inline")).unwrap();
    }
    assert_eq!(tx.count(&Query::text("body", "inline")).unwrap(), 20);
    tx.commit().unwrap();
    assert_eq!(engine.find(&Query::All).unwrap().len(), 20);
}

#[test]
fn delete_by_query_waits_for_earlier_jobs_and_precedes_later_ones() {
    let engine = engine_with(|c| {
        c.transaction.concurrency_level = 5;
        c.transaction.hashing = Hashing::Uid;
    })
    .with_job_executor(DelayedExecutor::new(Duration::from_millis(200)));
    engine
        .transaction(|tx| {
            tx.create(doc("1", "alpha"))?;
            tx.create(doc("2", "beta"))
        })
        .unwrap();

    let tx = engine.begin().unwrap();
    tx.create(doc("3", "alpha early")).unwrap();
    tx.update(doc("2", "alpha now")).unwrap();
    tx.delete_by_query(Query::text("body", "alpha"), &[ALIAS.to_string()])
        .unwrap();
    tx.create(doc("4", "alpha late")).unwrap();
    tx.create(doc("5", "beta late")).unwrap();

    assert_eq!(ids(&tx.find(&Query::All).unwrap()), vec!["4", "5"]);
    tx.commit().unwrap();
    assert_eq!(ids(&engine.find(&Query::All).unwrap()), vec!["4", "5"]);
}
