//! Read-committed processor
//!
//! New and updated documents go to a per-partition overlay. Deletes of
//! committed documents go to the partition's main writer, which publishes
//! nothing until commit, and are hidden from this transaction's searches by
//! the visibility filter. Other transactions see none of it until commit.
//!
//! The main reader used to mark deletes in a partition is pinned for the
//! rest of the transaction so that the marked document numbers stay valid.
//!
//! Partition-wide jobs are barriers. `delete_by_query` and `flush_commit`
//! wait for every queued per-resource job and then run on the calling
//! thread, so they see all earlier writes and none of the later ones.

use super::{
    combine_filters, commit_partitions, first_resource, key_query, resolve_partitions,
    ProcessorContext, StateCell, TransactionState, WriterSet,
};
use crate::filter::VisibilityFilter;
use crate::jobs::{ConcurrentJobProcessor, JobApplier, JobProcessorOptions};
use crate::trans_index::OverlaySettings;
use crate::trans_manager::TransIndexManager;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use vellum_core::{Query, Resource, ResourceKey, Result, Term, TransactionJob};
use vellum_storage::{evaluate, Hit, IndexReader, MultiSearcher, SearchFilter};

use super::TransactionState::{Begun, Idle, Prepared};

#[derive(Debug)]
struct Shared {
    ctx: ProcessorContext,
    writers: WriterSet,
    pinned: DashMap<String, Arc<IndexReader>>,
    overlays: TransIndexManager,
    filter: Arc<VisibilityFilter>,
}

impl Shared {
    fn pinned_reader(&self, partition: &str) -> Result<Arc<IndexReader>> {
        match self.pinned.entry(partition.to_string()) {
            Entry::Occupied(e) => Ok(Arc::clone(e.get())),
            Entry::Vacant(e) => {
                let reader = self.ctx.store.reader(partition)?;
                e.insert(Arc::clone(&reader));
                Ok(reader)
            }
        }
    }

    fn main_reader(&self, partition: &str) -> Result<Arc<IndexReader>> {
        match self.pinned.get(partition) {
            Some(reader) => Ok(Arc::clone(reader.value())),
            None => self.ctx.store.reader(partition),
        }
    }

    fn mark(&self, reader: &IndexReader, docs: impl IntoIterator<Item = u32>) {
        for doc in docs {
            self.filter.mark_delete(reader.id(), doc, reader.max_doc());
        }
    }

    fn delete_committed(&self, partition: &str, term: &Term) -> Result<()> {
        let writer = self.writers.get_or_open(&self.ctx.store, partition)?;
        let reader = self.pinned_reader(partition)?;
        self.mark(&reader, reader.term_docs(term));
        writer.delete_documents(term)?;
        Ok(())
    }

    fn flush_commit(&self, partition: &str) -> Result<()> {
        let writer = match self.writers.get(partition) {
            Some(writer) => writer,
            None if self.overlays.has_trans_index(partition) => {
                self.writers.get_or_open(&self.ctx.store, partition)?
            }
            None => return Ok(()),
        };
        if let Some(staged) = self.overlays.commit(partition)? {
            writer.add_indexes(&[staged])?;
        }
        writer.commit()?;
        self.overlays.close(partition);
        self.pinned.remove(partition);
        // The overlay is gone; own writes are only reachable through a fresh reader
        self.ctx.store.invalidate(partition);
        debug!(target: "vellum::engine", partition, "Flush-committed partition");
        Ok(())
    }

    fn commit_partition(&self, partition: &str) -> Result<()> {
        if let Some(staged) = self.overlays.commit(partition)? {
            let writer = self.writers.get_or_open(&self.ctx.store, partition)?;
            writer.add_indexes(&[staged])?;
        }
        self.writers.close(
            &self.ctx.store,
            partition,
            self.ctx.transaction.invalidate_cache_on_commit,
        )?;
        self.overlays.close(partition);
        self.pinned.remove(partition);
        Ok(())
    }

    fn touched(&self) -> Vec<String> {
        let mut names = self.writers.partitions();
        names.extend(self.overlays.partitions());
        names.sort();
        names.dedup();
        names
    }

    fn searcher(&self, partitions: &[String]) -> Result<MultiSearcher> {
        let mut searcher = MultiSearcher::default();
        for partition in partitions {
            searcher.push(partition.clone(), self.main_reader(partition)?);
            if let Some(overlay) = self.overlays.get(partition) {
                searcher.push(partition.clone(), overlay.reader()?);
            }
        }
        Ok(searcher)
    }

    fn visibility(&self) -> Option<Arc<dyn SearchFilter>> {
        if self.filter.has_deletes() {
            Some(Arc::clone(&self.filter) as Arc<dyn SearchFilter>)
        } else {
            None
        }
    }
}

impl JobApplier for Shared {
    fn apply(&self, job: &TransactionJob) -> Result<()> {
        let partition = job.partition();
        match job {
            TransactionJob::Create(_) => {
                self.writers.get_or_open(&self.ctx.store, partition)?;
                self.overlays.process_job(job)
            }
            TransactionJob::Update(resource) => {
                self.delete_committed(partition, &Term::uid(resource.key().uid()))?;
                self.overlays.process_job(job)
            }
            TransactionJob::Delete(key) => {
                self.delete_committed(partition, &Term::uid(key.uid()))?;
                self.overlays.process_job(job)
            }
            TransactionJob::DeleteByQuery { query, .. } => {
                let writer = self.writers.get_or_open(&self.ctx.store, partition)?;
                let reader = self.pinned_reader(partition)?;
                self.mark(&reader, evaluate(query, reader.as_ref()).iter());
                writer.delete_by_query(query)?;
                self.overlays.process_job(job)
            }
            TransactionJob::FlushCommit { .. } => self.flush_commit(partition),
        }
    }
}

/// Read-your-writes processor isolated from other transactions until commit.
#[derive(Debug)]
pub struct ReadCommittedProcessor {
    shared: Arc<Shared>,
    jobs: Option<ConcurrentJobProcessor>,
    state: StateCell,
}

impl ReadCommittedProcessor {
    /// Create an idle processor.
    pub fn new(ctx: ProcessorContext) -> Self {
        let settings = OverlaySettings {
            location: ctx.transaction.log_location(),
            index: ctx.store.config().clone(),
            optimize_on_commit: ctx.transaction.optimize_on_commit,
        };
        let overlays = TransIndexManager::new(
            settings,
            Arc::clone(&ctx.ids),
            Arc::clone(ctx.store.merge_executor()),
        );
        let jobs_enabled = ctx.transaction.concurrent_operations;
        let options = JobProcessorOptions::from(&ctx.transaction);
        let executor = Arc::clone(&ctx.job_executor);
        let shared = Arc::new(Shared {
            ctx,
            writers: WriterSet::default(),
            pinned: DashMap::new(),
            overlays,
            filter: Arc::new(VisibilityFilter::new()),
        });
        let jobs = jobs_enabled.then(|| {
            ConcurrentJobProcessor::new(
                options,
                Arc::clone(&shared) as Arc<dyn JobApplier>,
                executor,
            )
        });
        ReadCommittedProcessor {
            shared,
            jobs,
            state: StateCell::new(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransactionState {
        self.state.get()
    }

    /// Visibility filter of this transaction.
    pub fn visibility_filter(&self) -> &Arc<VisibilityFilter> {
        &self.shared.filter
    }

    /// Overlays of this transaction.
    pub fn overlays(&self) -> &TransIndexManager {
        &self.shared.overlays
    }

    /// Start the transaction.
    pub fn begin(&self) -> Result<()> {
        self.state.begin()?;
        self.shared.filter.clear();
        Ok(())
    }

    fn submit(&self, job: TransactionJob) -> Result<()> {
        self.state.require(&[Begun], "dirty operation")?;
        match &self.jobs {
            Some(jobs) => {
                // Writer lifecycle stays on the calling thread
                self.shared
                    .writers
                    .get_or_open(&self.shared.ctx.store, job.partition())?;
                jobs.add_job(job)
            }
            None => self.shared.apply(&job),
        }
    }

    fn drain(&self) -> Result<()> {
        match &self.jobs {
            Some(jobs) => jobs.wait_for_jobs(),
            None => Ok(()),
        }
    }

    /// Add a resource.
    pub fn create(&self, resource: Resource) -> Result<()> {
        self.submit(TransactionJob::Create(Arc::new(resource)))
    }

    /// Replace a resource.
    pub fn update(&self, resource: Resource) -> Result<()> {
        self.submit(TransactionJob::Update(Arc::new(resource)))
    }

    /// Remove a resource.
    pub fn delete(&self, key: ResourceKey) -> Result<()> {
        self.submit(TransactionJob::Delete(key))
    }

    /// Remove every match of `query`, in the partitions of `aliases` if given.
    pub fn delete_by_query(&self, query: Query, aliases: &[String]) -> Result<()> {
        self.state.require(&[Begun], "delete_by_query")?;
        self.drain()?;
        let query = Arc::new(query.restrict_to(aliases));
        let partitions = resolve_partitions(&self.shared.ctx, &[], aliases, self.shared.touched());
        for partition in partitions {
            self.shared.apply(&TransactionJob::DeleteByQuery {
                partition,
                query: Arc::clone(&query),
            })?;
        }
        Ok(())
    }

    /// Search main store and overlays after draining queued jobs.
    pub fn internal_search(
        &self,
        query: &Query,
        partitions: &[String],
        aliases: &[String],
        filter: Option<Arc<dyn SearchFilter>>,
    ) -> Result<Vec<Hit>> {
        self.state.require(&[Begun, Prepared], "search")?;
        self.drain()?;
        let partitions = resolve_partitions(&self.shared.ctx, partitions, aliases, self.shared.touched());
        let searcher = self.shared.searcher(&partitions)?;
        let filter = combine_filters(self.shared.visibility(), filter);
        searcher.search(&query.clone().restrict_to(aliases), filter.as_deref())
    }

    /// Number of hits across every partition.
    pub fn count(&self, query: &Query) -> Result<usize> {
        self.state.require(&[Begun, Prepared], "count")?;
        self.drain()?;
        let partitions = resolve_partitions(&self.shared.ctx, &[], &[], self.shared.touched());
        let searcher = self.shared.searcher(&partitions)?;
        searcher.count(query, self.shared.visibility().as_deref())
    }

    /// Load one resource as this transaction sees it.
    pub fn get(&self, key: &ResourceKey) -> Result<Option<Resource>> {
        let hits = self.internal_search(&key_query(key), &[key.partition().to_string()], &[], None)?;
        Ok(first_resource(&hits, &self.shared.ctx.scheme))
    }

    /// Apply queued jobs without committing.
    pub fn flush(&self) -> Result<()> {
        self.state.require(&[Begun], "flush")?;
        self.drain()
    }

    /// Publish the partitions of `aliases` (every touched one if empty).
    pub fn flush_commit(&self, aliases: &[String]) -> Result<()> {
        self.state.require(&[Begun], "flush_commit")?;
        self.drain()?;
        let partitions = if aliases.is_empty() {
            self.shared.touched()
        } else {
            self.shared
                .ctx
                .scheme
                .partitions_for(aliases.iter().map(String::as_str))
        };
        for partition in partitions {
            self.shared.apply(&TransactionJob::FlushCommit { partition })?;
        }
        Ok(())
    }

    /// Drain jobs and stage every overlay durably.
    pub fn prepare(&self) -> Result<()> {
        self.state.require(&[Begun], "prepare")?;
        self.drain()?;
        let staged = self.shared.overlays.commit_all()?;
        debug!(target: "vellum::engine", overlays = staged.len(), "Prepared transaction");
        self.state.set(Prepared);
        Ok(())
    }

    /// Merge overlays into the main store and publish every partition.
    ///
    /// # Errors
    ///
    /// The first partition failure stops the loop. See
    /// [`vellum_core::Error::CommitPartialFailure`].
    pub fn commit(&self, one_phase: bool) -> Result<()> {
        if one_phase && self.state.get() == Begun {
            self.prepare()?;
        }
        self.state.require(&[Prepared], "commit")?;
        let partitions = self.shared.touched();
        commit_partitions(&partitions, |p| self.shared.commit_partition(p))?;
        self.shared.filter.clear();
        self.shared.pinned.clear();
        self.state.set(TransactionState::Committed);
        debug!(target: "vellum::engine", partitions = partitions.len(), "Committed transaction");
        Ok(())
    }

    /// Discard queued jobs, main-writer changes and overlays.
    ///
    /// Cleanup failures are logged.
    pub fn rollback(&self) -> Result<()> {
        self.state.require(&[Idle, Begun, Prepared], "rollback")?;
        if let Some(jobs) = &self.jobs {
            jobs.clear();
            if let Err(e) = jobs.wait_for_jobs() {
                warn!(target: "vellum::engine", error = %e, "Job failure discarded by rollback");
            }
        }
        self.shared.writers.abort_all();
        // Failures are logged per overlay
        let _ = self.shared.overlays.rollback_all();
        self.shared.overlays.close_all();
        self.shared.filter.clear();
        self.shared.pinned.clear();
        self.state.set(TransactionState::RolledBack);
        debug!(target: "vellum::engine", "Rolled back transaction");
        Ok(())
    }
}
