//! Batch-insert processor
//!
//! Create-only bulk loading into the main writers. With `maintain_order`
//! creates are applied inline in submission order; otherwise they are spread
//! over the concurrent job workers.

use super::{
    commit_partitions, unsupported, ProcessorContext, StateCell, TransactionState, WriterSet,
};
use crate::jobs::{ConcurrentJobProcessor, JobApplier, JobProcessorOptions};
use std::sync::Arc;
use tracing::warn;
use vellum_core::{Query, Resource, ResourceKey, Result, TransactionJob};
use vellum_storage::{Hit, SearchFilter};

use super::TransactionState::{Begun, Idle, Prepared};

const NAME: &str = "batch_insert";

#[derive(Debug)]
struct Loader {
    ctx: ProcessorContext,
    writers: WriterSet,
}

impl JobApplier for Loader {
    fn apply(&self, job: &TransactionJob) -> Result<()> {
        match job {
            TransactionJob::Create(resource) => self
                .writers
                .get_or_open(&self.ctx.store, job.partition())?
                .add_document(resource.to_document()),
            _ => Err(unsupported(NAME, "non-create job")),
        }
    }
}

/// Create-only processor for bulk loads.
#[derive(Debug)]
pub struct BatchInsertProcessor {
    loader: Arc<Loader>,
    jobs: Option<ConcurrentJobProcessor>,
    state: StateCell,
}

impl BatchInsertProcessor {
    /// Create an idle processor.
    pub fn new(ctx: ProcessorContext) -> Self {
        let ordered = ctx.transaction.maintain_order;
        let options = JobProcessorOptions::from(&ctx.transaction);
        let executor = Arc::clone(&ctx.job_executor);
        let loader = Arc::new(Loader {
            ctx,
            writers: WriterSet::default(),
        });
        let jobs = (!ordered).then(|| {
            ConcurrentJobProcessor::new(options, Arc::clone(&loader) as Arc<dyn JobApplier>, executor)
        });
        BatchInsertProcessor {
            loader,
            jobs,
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

    fn drain(&self) -> Result<()> {
        match &self.jobs {
            Some(jobs) => jobs.wait_for_jobs(),
            None => Ok(()),
        }
    }

    /// Add a resource.
    pub fn create(&self, resource: Resource) -> Result<()> {
        self.state.require(&[Begun], "create")?;
        let job = TransactionJob::Create(Arc::new(resource));
        match &self.jobs {
            Some(jobs) => {
                self.loader
                    .writers
                    .get_or_open(&self.loader.ctx.store, job.partition())?;
                jobs.add_job(job)
            }
            None => self.loader.apply(&job),
        }
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

    /// Not supported.
    pub fn internal_search(
        &self,
        _query: &Query,
        _partitions: &[String],
        _aliases: &[String],
        _filter: Option<Arc<dyn SearchFilter>>,
    ) -> Result<Vec<Hit>> {
        Err(unsupported(NAME, "search"))
    }

    /// Not supported.
    pub fn count(&self, _query: &Query) -> Result<usize> {
        Err(unsupported(NAME, "count"))
    }

    /// Not supported.
    pub fn get(&self, _key: &ResourceKey) -> Result<Option<Resource>> {
        Err(unsupported(NAME, "get"))
    }

    /// Wait for queued creates.
    pub fn flush(&self) -> Result<()> {
        self.state.require(&[Begun], "flush")?;
        self.drain()
    }

    /// Publish the writers of `aliases` (every open writer if empty).
    pub fn flush_commit(&self, aliases: &[String]) -> Result<()> {
        self.state.require(&[Begun], "flush_commit")?;
        self.drain()?;
        let ctx = &self.loader.ctx;
        let partitions = if aliases.is_empty() {
            self.loader.writers.partitions()
        } else {
            ctx.scheme.partitions_for(aliases.iter().map(String::as_str))
        };
        for partition in partitions {
            if let Some(writer) = self.loader.writers.get(&partition) {
                writer.commit()?;
                ctx.store.invalidate(&partition);
            }
        }
        Ok(())
    }

    /// Wait for queued creates.
    pub fn prepare(&self) -> Result<()> {
        self.state.require(&[Begun], "prepare")?;
        self.drain()?;
        self.state.set(Prepared);
        Ok(())
    }

    /// Close every writer.
    pub fn commit(&self, one_phase: bool) -> Result<()> {
        if one_phase && self.state.get() == Begun {
            self.prepare()?;
        }
        self.state.require(&[Prepared], "commit")?;
        let ctx = &self.loader.ctx;
        let invalidate = ctx.transaction.invalidate_cache_on_commit;
        commit_partitions(&self.loader.writers.partitions(), |p| {
            self.loader.writers.close(&ctx.store, p, invalidate)
        })?;
        self.state.set(TransactionState::Committed);
        Ok(())
    }

    /// Drop queued creates and abort every writer.
    pub fn rollback(&self) -> Result<()> {
        self.state.require(&[Idle, Begun, Prepared], "rollback")?;
        if let Some(jobs) = &self.jobs {
            jobs.clear();
            if let Err(e) = jobs.wait_for_jobs() {
                warn!(target: "vellum::engine", error = %e, "Job failure discarded by rollback");
            }
        }
        self.loader.writers.abort_all();
        self.state.set(TransactionState::RolledBack);
        Ok(())
    }
}
