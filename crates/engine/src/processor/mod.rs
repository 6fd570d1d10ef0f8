//! Transaction processors
//!
//! A transaction is driven by one of a fixed set of processors, selected by
//! `transaction.processor` when the transaction is created:
//!
//! | Variant         | Dirty operations             | Reads see                     |
//! |-----------------|------------------------------|-------------------------------|
//! | `ReadCommitted` | overlay + delete filter      | own writes + committed data   |
//! | `DirectWriter`  | main writers                 | committed data                |
//! | `BatchInsert`   | creates only, main writers   | (unsupported)                 |
//! | `SearchOnly`    | (unsupported)                | committed data                |

mod batch;
mod direct;
mod read_committed;
mod search_only;

pub use batch::BatchInsertProcessor;
pub use direct::DirectWriterProcessor;
pub use read_committed::ReadCommittedProcessor;
pub use search_only::SearchOnlyProcessor;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::warn;
use vellum_core::{
    Error, IdGenerator, PartitionScheme, ProcessorKind, Query, Resource, ResourceKey, Result,
    Term, TransactionConfig,
};
use vellum_storage::{
    AndFilter, Hit, IndexStore, IndexWriter, MultiSearcher, SearchFilter, TaskExecutor,
};

/// Everything a processor needs from the engine.
#[derive(Debug, Clone)]
pub struct ProcessorContext {
    /// Main index.
    pub store: Arc<IndexStore>,
    /// Transaction settings.
    pub transaction: TransactionConfig,
    /// Partition assignment.
    pub scheme: PartitionScheme,
    /// Source of overlay names.
    pub ids: Arc<dyn IdGenerator>,
    /// Runs job worker loops.
    pub job_executor: Arc<dyn TaskExecutor>,
}

/// Transaction lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Created, not begun.
    Idle,
    /// Accepting operations.
    Begun,
    /// Staged; only commit or rollback remain.
    Prepared,
    /// Finished successfully.
    Committed,
    /// Finished by rollback.
    RolledBack,
}

impl TransactionState {
    /// Whether the transaction still holds resources.
    pub fn is_active(self) -> bool {
        matches!(self, TransactionState::Begun | TransactionState::Prepared)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Idle => "idle",
            TransactionState::Begun => "begun",
            TransactionState::Prepared => "prepared",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub(crate) struct StateCell(Mutex<TransactionState>);

impl StateCell {
    pub(crate) fn new() -> Self {
        StateCell(Mutex::new(TransactionState::Idle))
    }

    pub(crate) fn get(&self) -> TransactionState {
        *self.0.lock()
    }

    pub(crate) fn set(&self, state: TransactionState) {
        *self.0.lock() = state;
    }

    /// Fail unless the current state is one of `allowed`.
    pub(crate) fn require(&self, allowed: &[TransactionState], operation: &str) -> Result<()> {
        let current = self.get();
        if allowed.contains(&current) {
            return Ok(());
        }
        let expected = allowed
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" or ");
        Err(Error::InvalidState {
            expected: format!("{} transaction for {}", expected, operation),
            actual: current.to_string(),
        })
    }

    pub(crate) fn begin(&self) -> Result<()> {
        self.require(&[TransactionState::Idle], "begin")?;
        self.set(TransactionState::Begun);
        Ok(())
    }
}

/// Main-store writers opened by a transaction, one per partition.
#[derive(Debug, Default)]
pub(crate) struct WriterSet {
    writers: DashMap<String, Arc<IndexWriter>>,
}

impl WriterSet {
    pub(crate) fn get_or_open(&self, store: &IndexStore, partition: &str) -> Result<Arc<IndexWriter>> {
        if let Some(writer) = self.writers.get(partition) {
            return Ok(Arc::clone(writer.value()));
        }
        match self.writers.entry(partition.to_string()) {
            Entry::Occupied(e) => Ok(Arc::clone(e.get())),
            Entry::Vacant(e) => {
                let writer = Arc::new(store.open_writer(partition)?);
                e.insert(Arc::clone(&writer));
                Ok(writer)
            }
        }
    }

    pub(crate) fn get(&self, partition: &str) -> Option<Arc<IndexWriter>> {
        self.writers.get(partition).map(|w| Arc::clone(w.value()))
    }

    pub(crate) fn remove(&self, partition: &str) -> Option<Arc<IndexWriter>> {
        self.writers.remove(partition).map(|(_, w)| w)
    }

    pub(crate) fn partitions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.writers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Close the writer of `partition`, making its changes visible.
    pub(crate) fn close(&self, store: &IndexStore, partition: &str, invalidate: bool) -> Result<()> {
        if let Some(writer) = self.get(partition) {
            writer.close()?;
            self.remove(partition);
            if invalidate {
                store.invalidate(partition);
            }
        }
        Ok(())
    }

    /// Abort every writer; failures are logged.
    pub(crate) fn abort_all(&self) {
        for partition in self.partitions() {
            if let Some(writer) = self.remove(&partition) {
                if let Err(e) = writer.abort() {
                    warn!(target: "vellum::engine", partition = %partition, error = %e, "Failed to abort writer");
                }
            }
        }
    }
}

/// Run `commit` for every partition in order.
///
/// The first failure stops the loop. If earlier partitions were already
/// committed the error is `CommitPartialFailure` naming them.
pub(crate) fn commit_partitions<F>(partitions: &[String], mut commit: F) -> Result<()>
where
    F: FnMut(&str) -> Result<()>,
{
    let mut committed = Vec::new();
    for partition in partitions {
        if let Err(e) = commit(partition) {
            if committed.is_empty() {
                return Err(e);
            }
            return Err(Error::CommitPartialFailure {
                partition: partition.clone(),
                committed,
                source: Box::new(e),
            });
        }
        committed.push(partition.clone());
    }
    Ok(())
}

/// Partitions a search covers.
///
/// Explicit partitions win; otherwise the partitions of `aliases`; otherwise
/// every partition of the store plus `touched`.
pub(crate) fn resolve_partitions(
    ctx: &ProcessorContext,
    partitions: &[String],
    aliases: &[String],
    touched: Vec<String>,
) -> Vec<String> {
    let mut names = if !partitions.is_empty() {
        partitions.to_vec()
    } else if !aliases.is_empty() {
        ctx.scheme.partitions_for(aliases.iter().map(String::as_str))
    } else {
        let mut all = ctx.store.partitions();
        all.extend(touched);
        all
    };
    names.sort();
    names.dedup();
    names
}

/// Searcher over the committed main store.
pub(crate) fn committed_searcher(ctx: &ProcessorContext, partitions: &[String]) -> Result<MultiSearcher> {
    let mut searcher = MultiSearcher::default();
    for partition in partitions {
        searcher.push(partition.clone(), ctx.store.reader(partition)?);
    }
    Ok(searcher)
}

/// AND of the visibility filter (if any) and a caller filter (if any).
pub(crate) fn combine_filters(
    visibility: Option<Arc<dyn SearchFilter>>,
    user: Option<Arc<dyn SearchFilter>>,
) -> Option<Arc<dyn SearchFilter>> {
    match (visibility, user) {
        (Some(v), Some(u)) => Some(Arc::new(AndFilter::new(vec![v, u]))),
        (v, u) => v.or(u),
    }
}

/// Lookup query for a single resource.
pub(crate) fn key_query(key: &ResourceKey) -> Query {
    Query::Term(Term::uid(key.uid()))
}

/// First hit converted back to a resource.
pub(crate) fn first_resource(hits: &[Hit], scheme: &PartitionScheme) -> Option<Resource> {
    hits.iter()
        .find_map(|hit| Resource::from_document(&hit.document, scheme))
}

pub(crate) fn unsupported(processor: &'static str, operation: &'static str) -> Error {
    Error::Unsupported {
        processor,
        operation,
    }
}

/// A transaction processor of any kind.
#[derive(Debug)]
pub enum TransactionProcessor {
    /// Overlay-backed read-committed isolation.
    ReadCommitted(ReadCommittedProcessor),
    /// Writes straight to the main writers.
    DirectWriter(DirectWriterProcessor),
    /// Create-only bulk loading.
    BatchInsert(BatchInsertProcessor),
    /// Read-only.
    SearchOnly(SearchOnlyProcessor),
}

macro_rules! dispatch {
    ($self:ident, $p:ident => $body:expr) => {
        match $self {
            TransactionProcessor::ReadCommitted($p) => $body,
            TransactionProcessor::DirectWriter($p) => $body,
            TransactionProcessor::BatchInsert($p) => $body,
            TransactionProcessor::SearchOnly($p) => $body,
        }
    };
}

impl TransactionProcessor {
    /// Build the processor selected by `ctx.transaction.processor`.
    pub fn new(ctx: ProcessorContext) -> Self {
        match ctx.transaction.processor {
            ProcessorKind::ReadCommitted => {
                TransactionProcessor::ReadCommitted(ReadCommittedProcessor::new(ctx))
            }
            ProcessorKind::DirectWriter => {
                TransactionProcessor::DirectWriter(DirectWriterProcessor::new(ctx))
            }
            ProcessorKind::BatchInsert => {
                TransactionProcessor::BatchInsert(BatchInsertProcessor::new(ctx))
            }
            ProcessorKind::SearchOnly => {
                TransactionProcessor::SearchOnly(SearchOnlyProcessor::new(ctx))
            }
        }
    }

    /// Variant of this processor.
    pub fn kind(&self) -> ProcessorKind {
        match self {
            TransactionProcessor::ReadCommitted(_) => ProcessorKind::ReadCommitted,
            TransactionProcessor::DirectWriter(_) => ProcessorKind::DirectWriter,
            TransactionProcessor::BatchInsert(_) => ProcessorKind::BatchInsert,
            TransactionProcessor::SearchOnly(_) => ProcessorKind::SearchOnly,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransactionState {
        dispatch!(self, p => p.state())
    }

    /// Start the transaction.
    pub fn begin(&self) -> Result<()> {
        dispatch!(self, p => p.begin())
    }

    /// Add a resource.
    pub fn create(&self, resource: Resource) -> Result<()> {
        dispatch!(self, p => p.create(resource))
    }

    /// Replace a resource.
    pub fn update(&self, resource: Resource) -> Result<()> {
        dispatch!(self, p => p.update(resource))
    }

    /// Remove a resource.
    pub fn delete(&self, key: ResourceKey) -> Result<()> {
        dispatch!(self, p => p.delete(key))
    }

    /// Remove every resource matching `query`, limited to `aliases` if given.
    pub fn delete_by_query(&self, query: Query, aliases: &[String]) -> Result<()> {
        dispatch!(self, p => p.delete_by_query(query, aliases))
    }

    /// Search every partition.
    pub fn find(&self, query: &Query) -> Result<Vec<Hit>> {
        self.internal_search(query, &[], &[], None)
    }

    /// Search selected partitions and aliases with an optional extra filter.
    pub fn internal_search(
        &self,
        query: &Query,
        partitions: &[String],
        aliases: &[String],
        filter: Option<Arc<dyn SearchFilter>>,
    ) -> Result<Vec<Hit>> {
        dispatch!(self, p => p.internal_search(query, partitions, aliases, filter))
    }

    /// Number of hits of `query` across every partition.
    pub fn count(&self, query: &Query) -> Result<usize> {
        dispatch!(self, p => p.count(query))
    }

    /// Load one resource.
    pub fn get(&self, key: &ResourceKey) -> Result<Option<Resource>> {
        dispatch!(self, p => p.get(key))
    }

    /// Apply every queued operation without committing.
    pub fn flush(&self) -> Result<()> {
        dispatch!(self, p => p.flush())
    }

    /// Publish pending changes of the partitions of `aliases` (every touched
    /// partition if empty) without ending the transaction.
    pub fn flush_commit(&self, aliases: &[String]) -> Result<()> {
        dispatch!(self, p => p.flush_commit(aliases))
    }

    /// Stage the transaction durably without publishing it.
    pub fn prepare(&self) -> Result<()> {
        dispatch!(self, p => p.prepare())
    }

    /// Publish the transaction; `one_phase` prepares first.
    pub fn commit(&self, one_phase: bool) -> Result<()> {
        dispatch!(self, p => p.commit(one_phase))
    }

    /// Discard the transaction.
    pub fn rollback(&self) -> Result<()> {
        dispatch!(self, p => p.rollback())
    }
}
