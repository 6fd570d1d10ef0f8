//! Delete-visibility filter
//!
//! Documents deleted inside a transaction stay physically present in the
//! main store until commit. The filter records, per main-store reader, which
//! document numbers the transaction has deleted so searches can skip them.
//!
//! Bitsets are keyed by [`ReaderId`] because document numbers are only
//! stable for one reader snapshot. A reader with no entry is fully visible.
//! Bits only ever go from set to clear until [`VisibilityFilter::clear`].

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use vellum_core::Result;
use vellum_storage::{BitSet, DocSet, IndexReader, ReaderId, SearchFilter};

/// Per-reader visibility bitsets (set = visible).
#[derive(Debug, Default)]
pub struct VisibilityFilter {
    sets: DashMap<ReaderId, BitSet>,
    has_deletes: AtomicBool,
}

impl VisibilityFilter {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hide `doc` of `reader`.
    ///
    /// The reader's bitset is allocated all-visible with `max_doc` bits on
    /// first use; concurrent first calls allocate it once. Returns true if
    /// the document was visible before.
    pub fn mark_delete(&self, reader: ReaderId, doc: u32, max_doc: u32) -> bool {
        let cleared = self
            .sets
            .entry(reader)
            .or_insert_with(|| BitSet::full(max_doc as usize))
            .remove(doc);
        self.has_deletes.store(true, Ordering::Release);
        cleared
    }

    /// Whether anything was marked since the last clear.
    pub fn has_deletes(&self) -> bool {
        self.has_deletes.load(Ordering::Acquire)
    }

    /// Visible documents of `reader`.
    pub fn visibility(&self, reader: ReaderId) -> DocSet {
        match self.sets.get(&reader) {
            Some(set) => DocSet::Set(set.clone()),
            None => DocSet::All,
        }
    }

    /// Whether `doc` of `reader` is visible.
    pub fn is_visible(&self, reader: ReaderId, doc: u32) -> bool {
        self.sets
            .get(&reader)
            .map_or(true, |set| set.contains(doc))
    }

    /// Readers with at least one hidden document.
    pub fn tracked_readers(&self) -> usize {
        self.sets.len()
    }

    /// Drop every bitset.
    pub fn clear(&self) {
        self.sets.clear();
        self.has_deletes.store(false, Ordering::Release);
    }
}

impl SearchFilter for VisibilityFilter {
    fn doc_set(&self, reader: &IndexReader) -> Result<DocSet> {
        Ok(self.visibility(reader.id()))
    }
}
