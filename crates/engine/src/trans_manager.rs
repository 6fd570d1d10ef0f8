//! Overlay registry for one transaction
//!
//! Overlays are created lazily, at most one per partition, the first time a
//! create or update reaches that partition. Deletes never create an overlay:
//! there is nothing in a fresh overlay for them to remove.

use crate::trans_index::{OverlaySettings, TransIndex};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use vellum_core::{IdGenerator, Result, TransactionJob};
use vellum_storage::{Directory, TaskExecutor};

/// Per-partition overlays of a transaction.
#[derive(Debug)]
pub struct TransIndexManager {
    settings: OverlaySettings,
    ids: Arc<dyn IdGenerator>,
    executor: Arc<dyn TaskExecutor>,
    overlays: RwLock<HashMap<String, Arc<TransIndex>>>,
}

impl TransIndexManager {
    /// Create an empty registry.
    pub fn new(
        settings: OverlaySettings,
        ids: Arc<dyn IdGenerator>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        TransIndexManager {
            settings,
            ids,
            executor,
            overlays: RwLock::new(HashMap::new()),
        }
    }

    /// Route a job to the overlay of its partition.
    pub fn process_job(&self, job: &TransactionJob) -> Result<()> {
        match job {
            TransactionJob::Create(_) | TransactionJob::Update(_) => {
                self.get_or_create(job.partition())?.process_job(job)
            }
            TransactionJob::Delete(_) | TransactionJob::DeleteByQuery { .. } => {
                match self.get(job.partition()) {
                    Some(overlay) => overlay.process_job(job),
                    None => Ok(()),
                }
            }
            TransactionJob::FlushCommit { .. } => Ok(()),
        }
    }

    fn get_or_create(&self, partition: &str) -> Result<Arc<TransIndex>> {
        if let Some(overlay) = self.overlays.read().get(partition) {
            return Ok(Arc::clone(overlay));
        }
        let mut overlays = self.overlays.write();
        if let Some(overlay) = overlays.get(partition) {
            return Ok(Arc::clone(overlay));
        }
        let overlay = Arc::new(TransIndex::configure(
            partition,
            &self.settings,
            self.ids.as_ref(),
            Arc::clone(&self.executor),
        )?);
        overlays.insert(partition.to_string(), Arc::clone(&overlay));
        Ok(overlay)
    }

    /// Overlay of `partition`, if one was created.
    pub fn get(&self, partition: &str) -> Option<Arc<TransIndex>> {
        self.overlays.read().get(partition).cloned()
    }

    /// Whether `partition` has an overlay.
    pub fn has_trans_index(&self, partition: &str) -> bool {
        self.overlays.read().contains_key(partition)
    }

    /// Whether any overlay exists.
    pub fn has_transactions(&self) -> bool {
        !self.overlays.read().is_empty()
    }

    /// Partitions with an overlay, sorted.
    pub fn partitions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.overlays.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Commit the overlay of `partition`; `None` if there is none.
    pub fn commit(&self, partition: &str) -> Result<Option<Arc<dyn Directory>>> {
        match self.get(partition) {
            Some(overlay) => overlay.commit().map(Some),
            None => Ok(None),
        }
    }

    /// Roll back the overlay of `partition`, if any.
    pub fn rollback(&self, partition: &str) -> Result<()> {
        match self.get(partition) {
            Some(overlay) => overlay.rollback(),
            None => Ok(()),
        }
    }

    /// Forget the overlay of `partition` and release its storage.
    pub fn close(&self, partition: &str) {
        let removed = self.overlays.write().remove(partition);
        if let Some(overlay) = removed {
            overlay.close();
        }
    }

    /// Commit every overlay, stopping at the first failure.
    pub fn commit_all(&self) -> Result<Vec<(String, Arc<dyn Directory>)>> {
        let mut staged = Vec::new();
        for partition in self.partitions() {
            if let Some(dir) = self.commit(&partition)? {
                staged.push((partition, dir));
            }
        }
        Ok(staged)
    }

    /// Roll back every overlay.
    ///
    /// Every overlay is attempted; the first failure is returned.
    pub fn rollback_all(&self) -> Result<()> {
        let mut first = None;
        for partition in self.partitions() {
            if let Err(e) = self.rollback(&partition) {
                warn!(target: "vellum::engine", partition = %partition, error = %e, "Failed to roll back overlay");
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Release every overlay.
    pub fn close_all(&self) {
        let drained: Vec<Arc<TransIndex>> = self.overlays.write().drain().map(|(_, o)| o).collect();
        for overlay in drained {
            overlay.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vellum_core::{IndexConfig, LogLocation, PartitionScheme, Resource, ResourceKey, SequentialIds};
    use vellum_storage::{IndexReader, InlineExecutor};

    fn manager() -> TransIndexManager {
        TransIndexManager::new(
            OverlaySettings {
                location: LogLocation::Ram,
                index: IndexConfig::default(),
                optimize_on_commit: false,
            },
            Arc::new(SequentialIds::default()),
            Arc::new(InlineExecutor),
        )
    }

    fn create(alias: &str, id: &str) -> TransactionJob {
        let key = ResourceKey::single(alias, id, &PartitionScheme::Alias);
        TransactionJob::Create(Arc::new(Resource::new(key).keyword("name", id)))
    }

    #[test]
    fn test_delete_does_not_create_overlay() {
        let m = manager();
        let key = ResourceKey::single("Doc", "1", &PartitionScheme::Alias);
        m.process_job(&TransactionJob::Delete(key)).unwrap();
        assert!(!m.has_transactions());
        assert!(!m.has_trans_index("Doc"));
    }

    #[test]
    fn test_one_overlay_per_partition() {
        let m = manager();
        m.process_job(&create("Doc", "1")).unwrap();
        m.process_job(&create("Doc", "2")).unwrap();
        m.process_job(&create("Note", "1")).unwrap();
        assert_eq!(m.partitions(), vec!["Doc".to_string(), "Note".to_string()]);
        assert_eq!(m.get("Doc").unwrap().reader().unwrap().num_docs(), 2);
    }

    #[test]
    fn test_commit_all_then_close() {
        let m = manager();
        m.process_job(&create("Doc", "1")).unwrap();
        m.process_job(&create("Note", "1")).unwrap();
        let staged = m.commit_all().unwrap();
        assert_eq!(staged.len(), 2);
        for (_, dir) in &staged {
            assert_eq!(IndexReader::open(Arc::clone(dir)).unwrap().num_docs(), 1);
        }
        m.close_all();
        assert!(!m.has_transactions());
        assert!(m.commit("Doc").unwrap().is_none());
    }

    #[test]
    fn test_rollback_all_discards() {
        let m = manager();
        m.process_job(&create("Doc", "1")).unwrap();
        let dir = Arc::clone(m.get("Doc").unwrap().directory());
        m.rollback_all().unwrap();
        assert_eq!(IndexReader::open(dir).unwrap().num_docs(), 0);
        m.close("Doc");
        assert!(!m.has_trans_index("Doc"));
    }
}
