//! Direct-writer processor
//!
//! Dirty operations go straight to the main writers, inline. Nothing is
//! visible to anyone, this transaction included, until `flush_commit` or
//! `commit` publishes it.

use super::{
    commit_partitions, committed_searcher, first_resource, key_query, resolve_partitions,
    ProcessorContext, StateCell, TransactionState, WriterSet,
};
use std::sync::Arc;
use tracing::debug;
use vellum_core::{Query, Resource, ResourceKey, Result, Term};
use vellum_storage::{Hit, SearchFilter};

use super::TransactionState::{Begun, Idle, Prepared};

/// Processor writing to the main store without an overlay.
#[derive(Debug)]
pub struct DirectWriterProcessor {
    ctx: ProcessorContext,
    writers: WriterSet,
    state: StateCell,
}

impl DirectWriterProcessor {
    /// Create an idle processor.
    pub fn new(ctx: ProcessorContext) -> Self {
        DirectWriterProcessor {
            ctx,
            writers: WriterSet::default(),
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

    /// Add a resource.
    pub fn create(&self, resource: Resource) -> Result<()> {
        self.state.require(&[Begun], "create")?;
        let writer = self.writers.get_or_open(&self.ctx.store, resource.key().partition())?;
        writer.add_document(resource.to_document())
    }

    /// Replace a resource.
    pub fn update(&self, resource: Resource) -> Result<()> {
        self.state.require(&[Begun], "update")?;
        let writer = self.writers.get_or_open(&self.ctx.store, resource.key().partition())?;
        writer.delete_documents(&Term::uid(resource.key().uid()))?;
        writer.add_document(resource.to_document())
    }

    /// Remove a resource.
    pub fn delete(&self, key: ResourceKey) -> Result<()> {
        self.state.require(&[Begun], "delete")?;
        let writer = self.writers.get_or_open(&self.ctx.store, key.partition())?;
        writer.delete_documents(&Term::uid(key.uid()))?;
        Ok(())
    }

    /// Remove every match of `query`, in the partitions of `aliases` if given.
    pub fn delete_by_query(&self, query: Query, aliases: &[String]) -> Result<()> {
        self.state.require(&[Begun], "delete_by_query")?;
        let query = query.restrict_to(aliases);
        for partition in resolve_partitions(&self.ctx, &[], aliases, self.writers.partitions()) {
            let writer = self.writers.get_or_open(&self.ctx.store, &partition)?;
            let deleted = writer.delete_by_query(&query)?;
            debug!(target: "vellum::engine", partition = %partition, deleted, "Deleted by query");
        }
        Ok(())
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

    /// Nothing is queued; only checks the state.
    pub fn flush(&self) -> Result<()> {
        self.state.require(&[Begun], "flush")
    }

    /// Publish the writers of `aliases` (every open writer if empty).
    pub fn flush_commit(&self, aliases: &[String]) -> Result<()> {
        self.state.require(&[Begun], "flush_commit")?;
        let partitions = if aliases.is_empty() {
            self.writers.partitions()
        } else {
            self.ctx
                .scheme
                .partitions_for(aliases.iter().map(String::as_str))
        };
        for partition in partitions {
            if let Some(writer) = self.writers.get(&partition) {
                writer.commit()?;
                self.ctx.store.invalidate(&partition);
            }
        }
        Ok(())
    }

    /// Move to the prepared state; writers publish only on commit.
    pub fn prepare(&self) -> Result<()> {
        self.state.require(&[Begun], "prepare")?;
        self.state.set(Prepared);
        Ok(())
    }

    /// Close every writer.
    pub fn commit(&self, one_phase: bool) -> Result<()> {
        if one_phase && self.state.get() == Begun {
            self.prepare()?;
        }
        self.state.require(&[Prepared], "commit")?;
        let invalidate = self.ctx.transaction.invalidate_cache_on_commit;
        commit_partitions(&self.writers.partitions(), |p| {
            self.writers.close(&self.ctx.store, p, invalidate)
        })?;
        self.state.set(TransactionState::Committed);
        Ok(())
    }

    /// Abort every writer.
    pub fn rollback(&self) -> Result<()> {
        self.state.require(&[Idle, Begun, Prepared], "rollback")?;
        self.writers.abort_all();
        self.state.set(TransactionState::RolledBack);
        Ok(())
    }
}
