//! Index writer
//!
//! One writer per directory, enforced by `write.lock` held for the writer's
//! lifetime. Added documents are buffered in memory and flushed to a new
//! segment on [`IndexWriter::commit`]. Deletions are applied eagerly to the
//! writer's view of every segment and to the buffer; they become visible to
//! readers when the next commit point is published.
//!
//! Once more than `merge_factor` segments exist, the oldest ones are merged
//! in the background through a [`MergeScheduler`]. Merge results are
//! installed into the writer state and published by the following commit.

use crate::background::TaskExecutor;
use crate::directory::{obtain_lock, Directory, DirectoryLock, COMMIT_LOCK, WRITE_LOCK};
use crate::manifest::{read_latest, write_commit, CommitPoint, SegmentEntry};
use crate::merge::{MergeOutcome, MergeScheduler, MergeTask};
use crate::reader::{IndexReader, ReaderOptions};
use crate::search::evaluate;
use crate::segment::{analyze, Segment};
use crate::BitSet;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};
use vellum_core::{Document, Error, IndexConfig, Query, Result, Term};

/// Writer tuning.
#[derive(Debug, Clone, Copy)]
pub struct WriterOptions {
    /// How long to wait for directory locks.
    pub lock_timeout: Duration,
    /// Poll interval while waiting.
    pub lock_poll: Duration,
    /// Segment count that triggers a background merge.
    pub merge_factor: usize,
    /// Merges allowed to run at once.
    pub max_concurrent_merges: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self::from(&IndexConfig::default())
    }
}

impl From<&IndexConfig> for WriterOptions {
    fn from(config: &IndexConfig) -> Self {
        WriterOptions {
            lock_timeout: config.lock_timeout(),
            lock_poll: config.lock_poll_interval(),
            merge_factor: config.merge_factor,
            max_concurrent_merges: config.max_concurrent_merges,
        }
    }
}

impl WriterOptions {
    fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            suppress_lock: false,
            lock_timeout: self.lock_timeout,
            lock_poll: self.lock_poll,
        }
    }
}

struct WriterSegment {
    segment: Arc<Segment>,
    deleted: BitSet,
}

impl WriterSegment {
    fn fresh(segment: Segment) -> Self {
        let deleted = BitSet::new(segment.doc_count() as usize);
        WriterSegment {
            segment: Arc::new(segment),
            deleted,
        }
    }

    fn live(&self) -> u64 {
        u64::from(self.segment.doc_count()) - self.deleted.count() as u64
    }

    fn live_documents(&self) -> impl Iterator<Item = Arc<Document>> + '_ {
        self.segment
            .documents()
            .iter()
            .enumerate()
            .filter(|(ord, _)| !self.deleted.contains(*ord as u32))
            .map(|(_, doc)| Arc::clone(doc))
    }
}

struct WriterState {
    segments: Vec<WriterSegment>,
    buffered: Vec<Arc<Document>>,
    next_segment_id: u64,
    generation: u64,
    // Inputs of in-flight merges
    merging: HashSet<u64>,
    // Outputs of in-flight merges; never cleaned up while reserved
    reserved: HashSet<u64>,
    dirty: bool,
    closed: bool,
}

impl WriterState {
    fn allocate_segment_id(&mut self) -> u64 {
        let id = self.next_segment_id;
        self.next_segment_id += 1;
        id
    }
}

/// Exclusive writer over one directory.
pub struct IndexWriter {
    directory: Arc<dyn Directory>,
    options: WriterOptions,
    state: Arc<Mutex<WriterState>>,
    merges: MergeScheduler,
    write_lock: Mutex<Option<DirectoryLock>>,
}

impl std::fmt::Debug for IndexWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("IndexWriter")
            .field("location", &self.directory.location())
            .field("generation", &state.generation)
            .field("segments", &state.segments.len())
            .field("buffered", &state.buffered.len())
            .finish()
    }
}

impl IndexWriter {
    /// Open a writer, waiting up to the lock timeout for `write.lock`.
    ///
    /// # Errors
    ///
    /// `StorageOpen` if the lock cannot be obtained or the latest commit
    /// cannot be loaded.
    pub fn open(
        directory: Arc<dyn Directory>,
        options: WriterOptions,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self> {
        let location = directory.location();
        let write_lock = obtain_lock(
            directory.as_ref(),
            WRITE_LOCK,
            options.lock_timeout,
            options.lock_poll,
        )
        .map_err(|e| Error::storage_open(location.clone(), e))?;

        let state = Self::load_state(directory.as_ref(), &options)
            .map_err(|e| Error::storage_open(location.clone(), e))?;
        debug!(
            target: "vellum::storage",
            location = %location,
            generation = state.generation,
            segments = state.segments.len(),
            "Opened index writer"
        );

        Ok(IndexWriter {
            merges: MergeScheduler::new(executor, options.max_concurrent_merges),
            directory,
            options,
            state: Arc::new(Mutex::new(state)),
            write_lock: Mutex::new(Some(write_lock)),
        })
    }

    fn load_state(directory: &dyn Directory, options: &WriterOptions) -> Result<WriterState> {
        let commit = {
            let _commit_lock = obtain_lock(
                directory,
                COMMIT_LOCK,
                options.lock_timeout,
                options.lock_poll,
            )?;
            read_latest(directory)?
        };
        let mut state = WriterState {
            segments: Vec::new(),
            buffered: Vec::new(),
            next_segment_id: 0,
            generation: 0,
            merging: HashSet::new(),
            reserved: HashSet::new(),
            dirty: false,
            closed: false,
        };
        if let Some(commit) = commit {
            state.generation = commit.generation;
            state.next_segment_id = commit.next_segment_id;
            for entry in commit.segments {
                let segment = Segment::read_from(directory, entry.id)?;
                let deleted = BitSet::from_ordinals(segment.doc_count() as usize, entry.deleted);
                state.segments.push(WriterSegment {
                    segment: Arc::new(segment),
                    deleted,
                });
            }
        }
        Ok(state)
    }

    fn ensure_open(&self, state: &WriterState) -> Result<()> {
        if state.closed {
            return Err(Error::InvalidState {
                expected: "open writer".to_string(),
                actual: format!("closed writer on {}", self.directory.location()),
            });
        }
        Ok(())
    }

    /// Directory being written.
    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    /// Buffer a document for the next commit.
    pub fn add_document(&self, doc: Document) -> Result<()> {
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        state.buffered.push(Arc::new(doc));
        state.dirty = true;
        Ok(())
    }

    /// Delete every document containing `term`; returns how many were deleted.
    pub fn delete_documents(&self, term: &Term) -> Result<usize> {
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        let mut deleted = 0;
        for seg in &mut state.segments {
            for &ord in seg.segment.postings(term) {
                if seg.deleted.insert(ord) {
                    deleted += 1;
                }
            }
        }
        let before = state.buffered.len();
        state.buffered.retain(|doc| !contains_term(doc, term));
        deleted += before - state.buffered.len();
        if deleted > 0 {
            state.dirty = true;
        }
        Ok(deleted)
    }

    /// Delete every document matching `query`; returns how many were deleted.
    pub fn delete_by_query(&self, query: &Query) -> Result<usize> {
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        let mut deleted = 0;
        for seg in &mut state.segments {
            for ord in evaluate(query, seg.segment.as_ref()).iter() {
                if seg.deleted.insert(ord) {
                    deleted += 1;
                }
            }
        }
        if !state.buffered.is_empty() {
            let pending = Segment::build(u64::MAX, state.buffered.clone());
            let matches = evaluate(query, &pending);
            let mut ord = 0u32;
            state.buffered.retain(|_| {
                let keep = !matches.contains(ord);
                ord += 1;
                keep
            });
            deleted += matches.count();
        }
        if deleted > 0 {
            state.dirty = true;
        }
        Ok(deleted)
    }

    /// Append the live documents of other indexes as new segments.
    pub fn add_indexes(&self, sources: &[Arc<dyn Directory>]) -> Result<()> {
        for source in sources {
            let reader = IndexReader::open_with(Arc::clone(source), self.options.reader_options())?;
            let docs: Vec<Arc<Document>> =
                reader.documents().map(|(_, doc)| Arc::clone(doc)).collect();
            if docs.is_empty() {
                continue;
            }
            let mut state = self.state.lock();
            self.ensure_open(&state)?;
            let id = state.allocate_segment_id();
            let segment = Segment::build(id, docs);
            segment.write_to(self.directory.as_ref())?;
            debug!(
                target: "vellum::storage",
                from = %source.location(),
                into = %self.directory.location(),
                segment = id,
                docs = segment.doc_count(),
                "Added index"
            );
            state.segments.push(WriterSegment::fresh(segment));
            state.dirty = true;
        }
        Ok(())
    }

    /// Flush buffered documents and publish a new commit point.
    pub fn commit(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            self.ensure_open(&state)?;
            self.flush_buffered(&mut state)?;
            if state.dirty {
                self.publish(&mut state)?;
            }
        }
        self.maybe_merge();
        Ok(())
    }

    /// Merge everything into a single segment, inline.
    ///
    /// Waits for background merges first. The result is published by the
    /// next commit.
    pub fn optimize(&self) -> Result<()> {
        self.merges.wait_idle();
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        self.flush_buffered(&mut state)?;
        let has_deletions = state.segments.iter().any(|s| s.deleted.count() > 0);
        if state.segments.len() <= 1 && !has_deletions {
            return Ok(());
        }
        let docs: Vec<Arc<Document>> = state
            .segments
            .iter()
            .flat_map(|s| s.live_documents())
            .collect();
        let id = state.allocate_segment_id();
        let segment = Segment::build(id, docs);
        segment.write_to(self.directory.as_ref())?;
        debug!(
            target: "vellum::storage",
            location = %self.directory.location(),
            merged = state.segments.len(),
            segment = id,
            "Optimized index"
        );
        state.segments = vec![WriterSegment::fresh(segment)];
        state.dirty = true;
        Ok(())
    }

    /// Commit, let pending merges finish and release the write lock.
    pub fn close(&self) -> Result<()> {
        self.commit()?;
        self.merges.wait_idle();
        {
            let mut state = self.state.lock();
            if state.dirty {
                self.publish(&mut state)?;
            }
            state.closed = true;
        }
        self.write_lock.lock().take();
        Ok(())
    }

    /// Discard everything since the last commit and release the write lock.
    pub fn abort(&self) -> Result<()> {
        self.state.lock().closed = true;
        self.merges.wait_idle();
        {
            let mut state = self.state.lock();
            state.buffered.clear();
            state.segments.clear();
            state.dirty = false;
        }
        let result = self.delete_uncommitted();
        self.write_lock.lock().take();
        result
    }

    fn delete_uncommitted(&self) -> Result<()> {
        let _commit_lock = obtain_lock(
            self.directory.as_ref(),
            COMMIT_LOCK,
            self.options.lock_timeout,
            self.options.lock_poll,
        )?;
        let referenced: HashSet<u64> = read_latest(self.directory.as_ref())?
            .map(|c| c.segments.iter().map(|s| s.id).collect())
            .unwrap_or_default();
        for name in self.directory.list()? {
            if let Some(id) = Segment::parse_file_name(&name) {
                if !referenced.contains(&id) {
                    self.directory.delete(&name)?;
                }
            }
        }
        Ok(())
    }

    /// Live documents, buffered ones included.
    pub fn num_docs(&self) -> u64 {
        let state = self.state.lock();
        state.segments.iter().map(WriterSegment::live).sum::<u64>() + state.buffered.len() as u64
    }

    /// Documents buffered since the last flush.
    pub fn pending_docs(&self) -> usize {
        self.state.lock().buffered.len()
    }

    /// Segments in the writer's current view.
    pub fn segment_count(&self) -> usize {
        self.state.lock().segments.len()
    }

    /// Last published generation, 0 if never committed.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Whether the writer was closed or aborted.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Whether there are changes not yet published.
    pub fn has_uncommitted_changes(&self) -> bool {
        let state = self.state.lock();
        state.dirty || !state.buffered.is_empty()
    }

    /// Block until background merges are done.
    pub fn wait_for_merges(&self) {
        self.merges.wait_idle();
    }

    fn flush_buffered(&self, state: &mut WriterState) -> Result<()> {
        if state.buffered.is_empty() {
            return Ok(());
        }
        let id = state.allocate_segment_id();
        let segment = Segment::build(id, state.buffered.clone());
        segment.write_to(self.directory.as_ref())?;
        state.buffered.clear();
        state.segments.push(WriterSegment::fresh(segment));
        Ok(())
    }

    fn publish(&self, state: &mut WriterState) -> Result<()> {
        let _commit_lock = obtain_lock(
            self.directory.as_ref(),
            COMMIT_LOCK,
            self.options.lock_timeout,
            self.options.lock_poll,
        )?;
        let commit = CommitPoint {
            generation: state.generation + 1,
            next_segment_id: state.next_segment_id,
            segments: state
                .segments
                .iter()
                .map(|s| SegmentEntry {
                    id: s.segment.id(),
                    doc_count: s.segment.doc_count(),
                    deleted: s.deleted.iter().collect(),
                })
                .collect(),
        };
        write_commit(self.directory.as_ref(), &commit)?;
        state.generation = commit.generation;
        state.dirty = false;
        debug!(
            target: "vellum::storage",
            location = %self.directory.location(),
            generation = commit.generation,
            segments = commit.segments.len(),
            live_docs = commit.live_docs(),
            "Published commit point"
        );
        self.remove_unreferenced(state);
        Ok(())
    }

    // Runs under the commit lock; failures leave garbage, never corruption
    fn remove_unreferenced(&self, state: &WriterState) {
        let live: HashSet<u64> = state.segments.iter().map(|s| s.segment.id()).collect();
        let names = match self.directory.list() {
            Ok(names) => names,
            Err(e) => {
                warn!(target: "vellum::storage", error = %e, "Failed to list index files");
                return;
            }
        };
        for name in names {
            let stale = match (
                Segment::parse_file_name(&name),
                CommitPoint::parse_file_name(&name),
            ) {
                (Some(id), _) => !live.contains(&id) && !state.reserved.contains(&id),
                (_, Some(generation)) => generation < state.generation,
                _ => false,
            };
            if stale {
                if let Err(e) = self.directory.delete(&name) {
                    warn!(target: "vellum::storage", file = %name, error = %e, "Failed to remove stale index file");
                }
            }
        }
    }

    fn maybe_merge(&self) {
        let merge_factor = self.options.merge_factor.max(2);
        let task = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            let candidates: Vec<u64> = state
                .segments
                .iter()
                .map(|s| s.segment.id())
                .filter(|id| !state.merging.contains(id))
                .collect();
            if candidates.len() <= merge_factor {
                return;
            }
            let inputs = candidates[..merge_factor].to_vec();
            let output = state.allocate_segment_id();
            state.merging.extend(inputs.iter().copied());
            state.reserved.insert(output);
            SegmentMerge {
                state: Arc::downgrade(&self.state),
                directory: Arc::clone(&self.directory),
                inputs,
                output,
            }
        };
        self.merges.submit(Arc::new(task));
    }
}

fn contains_term(doc: &Document, term: &Term) -> bool {
    doc.fields()
        .iter()
        .filter(|f| f.name == term.field)
        .any(|f| analyze(f.kind, &f.value).contains(&term.text))
}

/// Background merge of a fixed set of segments into a reserved output id.
struct SegmentMerge {
    state: Weak<Mutex<WriterState>>,
    directory: Arc<dyn Directory>,
    inputs: Vec<u64>,
    output: u64,
}

impl SegmentMerge {
    fn release(&self, state: &mut WriterState) {
        for id in &self.inputs {
            state.merging.remove(id);
        }
        state.reserved.remove(&self.output);
    }

    fn discard_output(&self) {
        if let Err(e) = self.directory.delete(&Segment::file_name(self.output)) {
            warn!(target: "vellum::storage", segment = self.output, error = %e, "Failed to remove merge output");
        }
    }
}

impl MergeTask for SegmentMerge {
    fn run(&self) -> Result<MergeOutcome> {
        let Some(state) = self.state.upgrade() else {
            return Ok(MergeOutcome::Skipped);
        };

        let snapshot = {
            let mut st = state.lock();
            let mut snapshot = Vec::with_capacity(self.inputs.len());
            for id in &self.inputs {
                match st.segments.iter().find(|s| s.segment.id() == *id) {
                    Some(seg) => snapshot.push((Arc::clone(&seg.segment), seg.deleted.clone())),
                    None => break,
                }
            }
            if st.closed || snapshot.len() != self.inputs.len() {
                self.release(&mut st);
                return Ok(MergeOutcome::Skipped);
            }
            snapshot
        };

        let docs: Vec<Arc<Document>> = snapshot
            .iter()
            .flat_map(|(segment, deleted)| {
                segment
                    .documents()
                    .iter()
                    .enumerate()
                    .filter(move |(ord, _)| !deleted.contains(*ord as u32))
                    .map(|(_, doc)| Arc::clone(doc))
            })
            .collect();
        let merged = Segment::build(self.output, docs);
        merged.write_to(self.directory.as_ref())?;

        let mut st = state.lock();
        if st.closed {
            self.release(&mut st);
            drop(st);
            self.discard_output();
            return Ok(MergeOutcome::Skipped);
        }
        let unchanged = snapshot.iter().all(|(segment, deleted)| {
            st.segments
                .iter()
                .any(|s| s.segment.id() == segment.id() && s.deleted == *deleted)
        });
        if !unchanged {
            drop(st);
            self.discard_output();
            return Ok(MergeOutcome::Requeue);
        }

        let position = st
            .segments
            .iter()
            .position(|s| self.inputs.contains(&s.segment.id()))
            .unwrap_or(st.segments.len());
        st.segments.retain(|s| !self.inputs.contains(&s.segment.id()));
        let at = position.min(st.segments.len());
        st.segments.insert(at, WriterSegment::fresh(merged));
        st.dirty = true;
        self.release(&mut st);
        Ok(MergeOutcome::Done)
    }

    fn abandon(&self) {
        if let Some(state) = self.state.upgrade() {
            self.release(&mut state.lock());
        }
        self.discard_output();
    }

    fn describe(&self) -> String {
        format!(
            "{}: {:?} -> {}",
            self.directory.location(),
            self.inputs,
            self.output
        )
    }
}
