//! Read-only processor

use super::{
    committed_searcher, first_resource, key_query, resolve_partitions, unsupported,
    ProcessorContext, StateCell, TransactionState,
};
use std::sync::Arc;
use vellum_core::{Query, Resource, ResourceKey, Result};
use vellum_storage::{Hit, SearchFilter};

use super::TransactionState::{Begun, Idle, Prepared};

const NAME: &str = "search_only";

/// Processor that only reads committed data.
#[derive(Debug)]
pub struct SearchOnlyProcessor {
    ctx: ProcessorContext,
    state: StateCell,
}

impl SearchOnlyProcessor {
    /// Create an idle processor.
    pub fn new(ctx: ProcessorContext) -> Self {
        SearchOnlyProcessor {
            ctx,
            state: StateCell::new(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransactionState {
        self.state.get()
    }

    /// Start the transaction.
    pub fn begin(&self) -> Result<()> {
        self.state.begin()
    }

    /// Not supported.
    pub fn create(&self, _resource: Resource) -> Result<()> {
        Err(unsupported(NAME, "create"))
    }

    /// Not supported.
    pub fn update(&self, _resource: Resource) -> Result<()> {
        Err(unsupported(NAME, "update"))
    }

    /// Not supported.
    pub fn delete(&self, _key: ResourceKey) -> Result<()> {
        Err(unsupported(NAME, "delete"))
    }

    /// Not supported.
    pub fn delete_by_query(&self, _query: Query, _aliases: &[String]) -> Result<()> {
        Err(unsupported(NAME, "delete_by_query"))
    }

    /// Search committed data.
    pub fn internal_search(
        &self,
        query: &Query,
        partitions: &[String],
        aliases: &[String],
        filter: Option<Arc<dyn SearchFilter>>,
    ) -> Result<Vec<Hit>> {
        self.state.require(&[Begun, Prepared], "search")?;
        let partitions = resolve_partitions(&self.ctx, partitions, aliases, Vec::new());
        committed_searcher(&self.ctx, &partitions)?
            .search(&query.clone().restrict_to(aliases), filter.as_deref())
    }

    /// Number of committed hits.
    pub fn count(&self, query: &Query) -> Result<usize> {
        self.state.require(&[Begun, Prepared], "count")?;
        let partitions = resolve_partitions(&self.ctx, &[], &[], Vec::new());
        committed_searcher(&self.ctx, &partitions)?.count(query, None)
    }

    /// Load one committed resource.
    pub fn get(&self, key: &ResourceKey) -> Result<Option<Resource>> {
        let hits = self.internal_search(&key_query(key), &[key.partition().to_string()], &[], None)?;
        Ok(first_resource(&hits, &self.ctx.scheme))
    }

    /// Nothing to flush.
    pub fn flush(&self) -> Result<()> {
        self.state.require(&[Begun], "flush")
    }

    /// Not supported.
    pub fn flush_commit(&self, _aliases: &[String]) -> Result<()> {
        Err(unsupported(NAME, "flush_commit"))
    }

    /// State transition only.
    pub fn prepare(&self) -> Result<()> {
        self.state.require(&[Begun], "prepare")?;
        self.state.set(Prepared);
        Ok(())
    }

    /// State transition only.
    pub fn commit(&self, one_phase: bool) -> Result<()> {
        if one_phase && self.state.get() == Begun {
            self.prepare()?;
        }
        self.state.require(&[Prepared], "commit")?;
        self.state.set(TransactionState::Committed);
        Ok(())
    }

    /// State transition only.
    pub fn rollback(&self) -> Result<()> {
        self.state.require(&[Idle, Begun, Prepared], "rollback")?;
        self.state.set(TransactionState::RolledBack);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_core::{Error, IndexConfig, PartitionScheme, SequentialIds, TransactionConfig};
    use vellum_storage::{IndexStore, InlineExecutor};

    #[test]
    fn test_reads_committed_and_rejects_writes() {
        let store = Arc::new(IndexStore::in_memory(IndexConfig::default(), Arc::new(InlineExecutor)));
        let writer = store.open_writer("Doc").unwrap();
        let key = ResourceKey::single("Doc", "1", &PartitionScheme::Alias);
        writer
            .add_document(Resource::new(key.clone()).text("body", "stored").to_document())
            .unwrap();
        writer.close().unwrap();

        let p = SearchOnlyProcessor::new(ProcessorContext {
            store,
            transaction: TransactionConfig::default(),
            scheme: PartitionScheme::Alias,
            ids: Arc::new(SequentialIds::default()),
            job_executor: Arc::new(InlineExecutor),
        });
        p.begin().unwrap();
        assert_eq!(p.get(&key).unwrap().unwrap().value("body"), Some("stored"));
        assert_eq!(p.count(&Query::All).unwrap(), 1);
        assert!(matches!(
            p.create(Resource::new(key)),
            Err(Error::Unsupported { operation: "create", .. })
        ));
        p.commit(true).unwrap();
        assert_eq!(p.state(), TransactionState::Committed);
    }
}
