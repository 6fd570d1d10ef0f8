//! Transactional overlay index
//!
//! Each partition touched by a read-committed transaction gets a private
//! overlay: its own directory and writer, holding the documents the
//! transaction created. Readers over the overlay are materialized lazily and
//! refreshed only when a write happened since the last refresh.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use vellum_core::{Error, IdGenerator, IndexConfig, LogLocation, Result, Term, TransactionJob};
use vellum_storage::{
    Directory, FsDirectory, IndexReader, IndexSearcher, IndexWriter, RamDirectory,
    ReaderOptions, TaskExecutor, WriterOptions,
};

/// Settings shared by every overlay of a transaction.
#[derive(Debug, Clone)]
pub struct OverlaySettings {
    /// Where overlay directories are created.
    pub location: LogLocation,
    /// Lock and merge tuning for overlay writers.
    pub index: IndexConfig,
    /// Collapse the overlay to one segment before handing it over.
    pub optimize_on_commit: bool,
}

/// A private, per-partition overlay index.
pub struct TransIndex {
    partition: String,
    directory: Arc<dyn Directory>,
    writer: IndexWriter,
    reader_options: ReaderOptions,
    optimize_on_commit: bool,
    dirty: AtomicBool,
    // Guards the refresh check so concurrent callers reopen once
    cached: Mutex<Option<Arc<IndexReader>>>,
}

impl std::fmt::Debug for TransIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransIndex")
            .field("partition", &self.partition)
            .field("location", &self.directory.location())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

impl TransIndex {
    /// Create the overlay's storage and open its writer.
    ///
    /// # Errors
    ///
    /// `StorageOpen` if the location cannot be created or locked.
    pub fn configure(
        partition: &str,
        settings: &OverlaySettings,
        ids: &dyn IdGenerator,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self> {
        let name = format!("{}-{}", partition, ids.next_id());
        let directory: Arc<dyn Directory> = match &settings.location {
            LogLocation::Ram => Arc::new(RamDirectory::new(name)),
            LogLocation::Fs(prefix) => Arc::new(FsDirectory::open(prefix.join(&name))?),
        };
        let writer = IndexWriter::open(
            Arc::clone(&directory),
            WriterOptions::from(&settings.index),
            executor,
        )?;
        debug!(target: "vellum::engine", partition, location = %directory.location(), "Configured overlay index");
        Ok(TransIndex {
            partition: partition.to_string(),
            directory,
            writer,
            reader_options: ReaderOptions::from(&settings.index).without_lock(),
            optimize_on_commit: settings.optimize_on_commit,
            dirty: AtomicBool::new(false),
            cached: Mutex::new(None),
        })
    }

    /// Partition this overlay buffers.
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Overlay storage.
    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    /// Whether writes happened since the last refresh.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Apply a dirty operation to the private writer.
    pub fn process_job(&self, job: &TransactionJob) -> Result<()> {
        match job {
            TransactionJob::Create(resource) => {
                self.writer.add_document(resource.to_document())?;
            }
            TransactionJob::Update(resource) => {
                self.writer
                    .delete_documents(&Term::uid(resource.key().uid()))?;
                self.writer.add_document(resource.to_document())?;
            }
            TransactionJob::Delete(key) => {
                self.writer.delete_documents(&Term::uid(key.uid()))?;
            }
            TransactionJob::DeleteByQuery { query, .. } => {
                self.writer.delete_by_query(query)?;
            }
            TransactionJob::FlushCommit { .. } => {
                return Err(Error::InvalidOperation(format!(
                    "overlay {} cannot apply {}",
                    self.partition, job
                )));
            }
        }
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    /// Current reader, refreshed first if the overlay is dirty.
    pub fn reader(&self) -> Result<Arc<IndexReader>> {
        let mut cached = self.cached.lock();
        let dirty = self.dirty.swap(false, Ordering::AcqRel);
        if !dirty {
            if let Some(reader) = cached.as_ref() {
                return Ok(Arc::clone(reader));
            }
        }
        if dirty {
            if let Err(e) = self.writer.commit() {
                self.dirty.store(true, Ordering::Release);
                return Err(e);
            }
        }
        let reader = match cached.as_ref() {
            Some(current) => match current.reopen()? {
                Some(newer) => Arc::new(newer),
                None => Arc::clone(current),
            },
            None => Arc::new(IndexReader::open_with(
                Arc::clone(&self.directory),
                self.reader_options,
            )?),
        };
        *cached = Some(Arc::clone(&reader));
        Ok(reader)
    }

    /// Searcher over [`TransIndex::reader`].
    pub fn searcher(&self) -> Result<IndexSearcher> {
        Ok(IndexSearcher::new(self.reader()?))
    }

    /// Make the overlay durable and close its writer.
    ///
    /// The returned directory can be merged into the main store.
    pub fn commit(&self) -> Result<Arc<dyn Directory>> {
        self.cached.lock().take();
        if !self.writer.is_closed() {
            if self.optimize_on_commit {
                self.writer.optimize()?;
            }
            self.writer.close()?;
        }
        self.dirty.store(false, Ordering::Release);
        Ok(Arc::clone(&self.directory))
    }

    /// Discard everything written to the overlay.
    pub fn rollback(&self) -> Result<()> {
        self.cached.lock().take();
        self.dirty.store(false, Ordering::Release);
        self.writer.abort()
    }

    /// Release the overlay's storage.
    ///
    /// Failures are logged; there is nothing left to recover.
    pub fn close(&self) {
        self.cached.lock().take();
        if !self.writer.is_closed() {
            if let Err(e) = self.writer.abort() {
                warn!(target: "vellum::engine", partition = %self.partition, error = %e, "Failed to abort overlay writer");
            }
        }
        if let Err(e) = self.directory.destroy() {
            warn!(
                target: "vellum::engine",
                partition = %self.partition,
                location = %self.directory.location(),
                error = %e,
                "Failed to remove overlay storage"
            );
        }
    }
}
