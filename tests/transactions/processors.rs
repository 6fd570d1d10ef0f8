//! Direct-writer, batch-insert and search-only processors, and the modulo
//! partition scheme

use crate::common::*;
use vellum::{Error, PartitionScheme, ProcessorKind, Query, Resource, ResourceKey};

#[test]
fn direct_writer_reads_only_committed_data() {
    let engine = engine();
    let tx = engine.begin_with(ProcessorKind::DirectWriter).unwrap();
    tx.create(doc("1", "direct")).unwrap();
    assert!(tx.get(&key("1")).unwrap().is_none());

    tx.flush_commit(&[]).unwrap();
    assert!(tx.get(&key("1")).unwrap().is_some());
    assert!(engine.get(&key("1")).unwrap().is_some());

    tx.delete(key("1")).unwrap();
    tx.create(doc("2", "direct")).unwrap();
    tx.commit().unwrap();
    assert_eq!(ids(&engine.find(&Query::All).unwrap()), vec!["2"]);
}

#[test]
fn direct_writer_rollback_discards_unflushed_writes() {
    let engine = engine();
    let tx = engine.begin_with(ProcessorKind::DirectWriter).unwrap();
    tx.create(doc("1", "lost")).unwrap();
    tx.rollback().unwrap();
    assert!(engine.find(&Query::All).unwrap().is_empty());
}

#[test]
fn batch_insert_loads_in_order_and_in_parallel() {
    for maintain_order in [true, false] {
        let engine = engine_with(|c| c.transaction.maintain_order = maintain_order);
        let tx = engine.begin_with(ProcessorKind::BatchInsert).unwrap();
        for n in 0..50 {
            tx.create(doc(&n.to_string(), "bulk")).unwrap();
        }
        assert!(matches!(
            tx.update(doc("0", "x")),
            Err(Error::Unsupported { processor: "batch_insert", .. })
        ));
        assert!(matches!(tx.find(&Query::All), Err(Error::Unsupported { .. })));
        tx.commit().unwrap();
        assert_eq!(engine.find(&Query::text("body", "bulk")).unwrap().len(), 50);
    }
}

#[test]
fn search_only_rejects_writes() {
    let engine = engine();
    engine.transaction(|tx| tx.create(doc("1", "readable"))).unwrap();
    let tx = engine.begin_with(ProcessorKind::SearchOnly).unwrap();
    assert_eq!(tx.count(&Query::All).unwrap(), 1);
    assert!(matches!(
        tx.delete(key("1")),
        Err(Error::Unsupported { processor: "search_only", operation: "delete" })
    ));
    assert!(matches!(tx.flush_commit(&[]), Err(Error::Unsupported { .. })));
    tx.commit().unwrap();
    assert!(engine.get(&key("1")).unwrap().is_some());
}

#[test]
fn modulo_scheme_spreads_resources_over_partitions() {
    let scheme = PartitionScheme::Modulo {
        prefix: "shard".to_string(),
        size: 3,
    };
    let engine = engine_with(|c| c.partitions = scheme.clone());
    let keys: Vec<ResourceKey> = (0..30)
        .map(|n| ResourceKey::single(ALIAS, n.to_string(), &scheme))
        .collect();

    let tx = engine.begin().unwrap();
    for k in &keys {
        tx.create(Resource::new(k.clone()).text("body", "sharded")).unwrap();
    }
    assert_eq!(tx.find(&Query::alias(ALIAS)).unwrap().len(), 30);
    tx.delete(keys[0].clone()).unwrap();
    tx.commit().unwrap();

    let hits = engine.find(&Query::text("body", "sharded")).unwrap();
    assert_eq!(hits.len(), 29);
    let mut partitions: Vec<&str> = hits.iter().map(|h| h.partition.as_str()).collect();
    partitions.sort();
    partitions.dedup();
    assert!(partitions.iter().all(|p| p.starts_with("shard_")));
    assert!(partitions.len() > 1);
    assert!(engine.get(&keys[0]).unwrap().is_none());
    assert!(engine.get(&keys[1]).unwrap().is_some());
}
