//! File-system backed main index and overlays

use crate::common::*;
use vellum::{Query, SearchEngine, CONFIG_FILE_NAME};

fn overlay_entries(disk: &DiskEngine) -> usize {
    std::fs::read_dir(&disk.overlays)
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[test]
fn overlays_live_on_disk_until_commit() {
    let disk = DiskEngine::new();
    let tx = disk.engine.begin().unwrap();
    tx.create(doc("1", "on disk")).unwrap();
    tx.flush().unwrap();
    assert_eq!(overlay_entries(&disk), 1);

    tx.commit().unwrap();
    assert_eq!(overlay_entries(&disk), 0);
    assert!(disk.engine.get(&key("1")).unwrap().is_some());
}

#[test]
fn rollback_removes_overlay_directories() {
    let disk = DiskEngine::new();
    let tx = disk.engine.begin().unwrap();
    tx.create(doc("1", "scratch")).unwrap();
    tx.flush().unwrap();
    tx.rollback().unwrap();
    assert_eq!(overlay_entries(&disk), 0);
    assert!(disk.engine.find(&Query::All).unwrap().is_empty());
}

#[test]
fn committed_data_survives_reopen() {
    let disk = DiskEngine::new();
    disk.engine
        .transaction(|tx| {
            tx.create(doc("1", "durable"))?;
            tx.create(doc("2", "durable"))
        })
        .unwrap();

    let reopened = SearchEngine::open(disk.root().join("index"), test_config()).unwrap();
    assert_eq!(
        ids(&reopened.find(&Query::text("body", "durable")).unwrap()),
        vec!["1", "2"]
    );
}

#[test]
fn open_dir_uses_config_file() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(
        dir.path().join(CONFIG_FILE_NAME),
        "[transaction]\nconcurrent_operations = false\n\n[index]\nreader_refresh_interval_ms = 0\n",
    )
    .unwrap();
    let engine = SearchEngine::open_dir(dir.path()).unwrap();
    assert!(!engine.config().transaction.concurrent_operations);

    engine.transaction(|tx| tx.create(doc("1", "configured"))).unwrap();
    assert!(engine.get(&key("1")).unwrap().is_some());
}
