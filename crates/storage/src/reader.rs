//! Point-in-time index readers
//!
//! An [`IndexReader`] is a snapshot of one commit point: the segments it
//! lists plus their deletions, loaded fully into memory. Global document
//! numbers are assigned by concatenating segments in commit order, so a
//! `(ReaderId, doc)` pair identifies a document for the reader's lifetime.
//!
//! Opening takes the directory's commit lock unless the caller suppresses
//! it; suppression is for readers whose directory writer is serialized with
//! them by other means (transaction overlays).

use crate::directory::{obtain_lock, Directory, COMMIT_LOCK};
use crate::manifest::{read_commit, read_latest, CommitPoint};
use crate::search::PostingsSource;
use crate::segment::Segment;
use crate::BitSet;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vellum_core::{Document, IndexConfig, Result, Term};

static NEXT_READER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique reader identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReaderId(u64);

impl ReaderId {
    fn next() -> Self {
        ReaderId(NEXT_READER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ReaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reader-{}", self.0)
    }
}

/// How a reader is opened.
#[derive(Debug, Clone, Copy)]
pub struct ReaderOptions {
    /// Skip the commit lock.
    pub suppress_lock: bool,
    /// How long to wait for the commit lock.
    pub lock_timeout: Duration,
    /// Poll interval while waiting.
    pub lock_poll: Duration,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self::from(&IndexConfig::default())
    }
}

impl From<&IndexConfig> for ReaderOptions {
    fn from(config: &IndexConfig) -> Self {
        ReaderOptions {
            suppress_lock: false,
            lock_timeout: config.lock_timeout(),
            lock_poll: config.lock_poll_interval(),
        }
    }
}

impl ReaderOptions {
    /// Same options with the commit lock suppressed.
    pub fn without_lock(mut self) -> Self {
        self.suppress_lock = true;
        self
    }
}

struct SegmentReader {
    segment: Arc<Segment>,
    base: u32,
    deleted: BitSet,
}

/// A point-in-time view of an index.
pub struct IndexReader {
    id: ReaderId,
    directory: Arc<dyn Directory>,
    options: ReaderOptions,
    generation: Option<u64>,
    segments: Vec<SegmentReader>,
    max_doc: u32,
    num_docs: u32,
}

impl fmt::Debug for IndexReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexReader")
            .field("id", &self.id)
            .field("location", &self.directory.location())
            .field("generation", &self.generation)
            .field("max_doc", &self.max_doc)
            .field("num_docs", &self.num_docs)
            .finish()
    }
}

impl IndexReader {
    /// Open the latest commit with default options.
    pub fn open(directory: Arc<dyn Directory>) -> Result<Self> {
        Self::open_with(directory, ReaderOptions::default())
    }

    /// Open the latest commit.
    ///
    /// An index that was never committed opens as an empty reader.
    pub fn open_with(directory: Arc<dyn Directory>, options: ReaderOptions) -> Result<Self> {
        let _lock = if options.suppress_lock {
            None
        } else {
            Some(obtain_lock(
                directory.as_ref(),
                COMMIT_LOCK,
                options.lock_timeout,
                options.lock_poll,
            )?)
        };
        let commit = read_latest(directory.as_ref())?;
        Self::load(directory, options, commit, &HashMap::new())
    }

    /// Reopen if a newer commit exists, reusing unchanged segments.
    ///
    /// Returns `None` when this reader is already current.
    pub fn reopen(&self) -> Result<Option<IndexReader>> {
        let _lock = if self.options.suppress_lock {
            None
        } else {
            Some(obtain_lock(
                self.directory.as_ref(),
                COMMIT_LOCK,
                self.options.lock_timeout,
                self.options.lock_poll,
            )?)
        };
        let latest = crate::manifest::latest_generation(self.directory.as_ref())?;
        if latest == self.generation {
            return Ok(None);
        }
        let commit = match latest {
            Some(generation) => Some(read_commit(self.directory.as_ref(), generation)?),
            None => None,
        };
        let loaded: HashMap<u64, Arc<Segment>> = self
            .segments
            .iter()
            .map(|s| (s.segment.id(), Arc::clone(&s.segment)))
            .collect();
        Self::load(Arc::clone(&self.directory), self.options, commit, &loaded).map(Some)
    }

    fn load(
        directory: Arc<dyn Directory>,
        options: ReaderOptions,
        commit: Option<CommitPoint>,
        loaded: &HashMap<u64, Arc<Segment>>,
    ) -> Result<Self> {
        let generation = commit.as_ref().map(|c| c.generation);
        let mut segments = Vec::new();
        let mut base = 0u32;
        let mut num_docs = 0u32;
        for entry in commit.map(|c| c.segments).unwrap_or_default() {
            let segment = match loaded.get(&entry.id) {
                Some(segment) => Arc::clone(segment),
                None => Arc::new(Segment::read_from(directory.as_ref(), entry.id)?),
            };
            let deleted = BitSet::from_ordinals(segment.doc_count() as usize, entry.deleted);
            num_docs += segment.doc_count() - deleted.count() as u32;
            let doc_count = segment.doc_count();
            segments.push(SegmentReader {
                segment,
                base,
                deleted,
            });
            base += doc_count;
        }
        Ok(IndexReader {
            id: ReaderId::next(),
            directory,
            options,
            generation,
            segments,
            max_doc: base,
            num_docs,
        })
    }

    /// Reader identity.
    pub fn id(&self) -> ReaderId {
        self.id
    }

    /// Directory this reader was opened on.
    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    /// Commit generation, or `None` for a never-committed index.
    pub fn generation(&self) -> Option<u64> {
        self.generation
    }

    /// One past the highest document number.
    pub fn max_doc(&self) -> u32 {
        self.max_doc
    }

    /// Live (non-deleted) documents.
    pub fn num_docs(&self) -> u32 {
        self.num_docs
    }

    /// Whether any document is deleted.
    pub fn has_deletions(&self) -> bool {
        self.num_docs < self.max_doc
    }

    /// Number of segments.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn locate(&self, doc: u32) -> Option<(&SegmentReader, u32)> {
        if doc >= self.max_doc {
            return None;
        }
        let idx = self.segments.partition_point(|s| s.base <= doc) - 1;
        let seg = &self.segments[idx];
        Some((seg, doc - seg.base))
    }

    /// Whether `doc` is deleted; out-of-range documents count as deleted.
    pub fn is_deleted(&self, doc: u32) -> bool {
        match self.locate(doc) {
            Some((seg, ord)) => seg.deleted.contains(ord),
            None => true,
        }
    }

    /// Stored document, or `None` if deleted or out of range.
    pub fn document(&self, doc: u32) -> Option<Arc<Document>> {
        let (seg, ord) = self.locate(doc)?;
        if seg.deleted.contains(ord) {
            return None;
        }
        seg.segment.document(ord).cloned()
    }

    /// Live documents containing `term`, ascending.
    pub fn term_docs(&self, term: &Term) -> Vec<u32> {
        let mut docs = Vec::new();
        for seg in &self.segments {
            for &ord in seg.segment.postings(term) {
                if !seg.deleted.contains(ord) {
                    docs.push(seg.base + ord);
                }
            }
        }
        docs
    }

    /// Live documents with their numbers, in document order.
    pub fn documents(&self) -> impl Iterator<Item = (u32, &Arc<Document>)> + '_ {
        self.segments.iter().flat_map(|seg| {
            seg.segment
                .documents()
                .iter()
                .enumerate()
                .filter(move |(ord, _)| !seg.deleted.contains(*ord as u32))
                .map(move |(ord, doc)| (seg.base + ord as u32, doc))
        })
    }
}

impl PostingsSource for IndexReader {
    fn max_doc(&self) -> u32 {
        self.max_doc
    }

    fn matching(&self, term: &Term) -> Vec<u32> {
        self.term_docs(term)
    }

    fn live_docs(&self) -> BitSet {
        let mut live = BitSet::full(self.max_doc as usize);
        for seg in &self.segments {
            for ord in seg.deleted.iter() {
                live.remove(seg.base + ord);
            }
        }
        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{write_commit, SegmentEntry};
    use crate::RamDirectory;
    use vellum_core::FieldKind;

    fn doc(uid: &str) -> Arc<Document> {
        Arc::new(Document::new().with("$/uid", uid, FieldKind::Keyword))
    }

    fn publish(dir: &dyn Directory, generation: u64, segments: Vec<(u64, Vec<&str>, Vec<u32>)>) {
        let mut entries = Vec::new();
        for (id, uids, deleted) in segments {
            let seg = Segment::build(id, uids.into_iter().map(doc).collect());
            if !dir.exists(&Segment::file_name(id)).unwrap() {
                seg.write_to(dir).unwrap();
            }
            entries.push(SegmentEntry {
                id,
                doc_count: seg.doc_count(),
                deleted,
            });
        }
        write_commit(
            dir,
            &CommitPoint {
                generation,
                next_segment_id: 10,
                segments: entries,
            },
        )
        .unwrap();
    }

    #[test]
    fn test_empty_index_opens_empty() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new("r"));
        let reader = IndexReader::open(dir).unwrap();
        assert_eq!(reader.generation(), None);
        assert_eq!(reader.max_doc(), 0);
        assert!(reader.document(0).is_none());
    }

    #[test]
    fn test_global_doc_numbers_and_deletions() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new("r"));
        publish(
            dir.as_ref(),
            1,
            vec![(0, vec!["a", "b"], vec![1]), (1, vec!["c"], vec![])],
        );
        let reader = IndexReader::open(Arc::clone(&dir)).unwrap();
        assert_eq!(reader.max_doc(), 3);
        assert_eq!(reader.num_docs(), 2);
        assert!(reader.has_deletions());
        assert!(reader.is_deleted(1));
        assert!(reader.document(1).is_none());
        assert_eq!(reader.document(2).unwrap().uid(), Some("c"));
        assert_eq!(reader.term_docs(&Term::uid("c")), vec![2]);
        assert!(reader.term_docs(&Term::uid("b")).is_empty());
        let uids: Vec<_> = reader.documents().map(|(_, d)| d.uid().unwrap()).collect();
        assert_eq!(uids, vec!["a", "c"]);
    }

    #[test]
    fn test_reopen_reuses_segments() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new("r"));
        publish(dir.as_ref(), 1, vec![(0, vec!["a"], vec![])]);
        let first = IndexReader::open(Arc::clone(&dir)).unwrap();
        assert!(first.reopen().unwrap().is_none());

        publish(
            dir.as_ref(),
            2,
            vec![(0, vec!["a"], vec![0]), (1, vec!["b"], vec![])],
        );
        let second = first.reopen().unwrap().unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(second.generation(), Some(2));
        assert!(Arc::ptr_eq(
            &first.segments[0].segment,
            &second.segments[0].segment
        ));
        assert_eq!(second.num_docs(), 1);
        // The old snapshot is unaffected
        assert_eq!(first.num_docs(), 1);
        assert_eq!(first.document(0).unwrap().uid(), Some("a"));
    }

    #[test]
    fn test_held_commit_lock_times_out_unless_suppressed() {
        let ram = Arc::new(RamDirectory::new("r"));
        let dir: Arc<dyn Directory> = ram.clone();
        let _held = ram.try_lock(COMMIT_LOCK).unwrap().unwrap();
        let options = ReaderOptions {
            suppress_lock: false,
            lock_timeout: Duration::from_millis(20),
            lock_poll: Duration::from_millis(5),
        };
        assert!(IndexReader::open_with(Arc::clone(&dir), options).is_err());
        assert!(IndexReader::open_with(dir, options.without_lock()).is_ok());
    }
}
