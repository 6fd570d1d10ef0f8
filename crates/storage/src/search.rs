//! Query evaluation, filters and searchers
//!
//! Queries evaluate to a [`BitSet`] of matching live documents. Hits carry
//! no score; results are returned in document order, partition by partition.
//! A [`SearchFilter`] narrows the candidate set per reader before query
//! evaluation results are collected.

use crate::reader::{IndexReader, ReaderId};
use crate::tokenizer::tokenize_unique;
use crate::BitSet;
use std::fmt::Debug;
use std::sync::Arc;
use vellum_core::{Document, Query, Result, Term};

/// Anything queries can be evaluated against.
pub trait PostingsSource {
    /// One past the highest ordinal.
    fn max_doc(&self) -> u32;

    /// Ordinals containing `term`, ascending; may include deleted ordinals.
    fn matching(&self, term: &Term) -> Vec<u32>;

    /// Ordinals not deleted.
    fn live_docs(&self) -> BitSet;
}

/// Live documents matching `query`.
pub fn evaluate(query: &Query, source: &dyn PostingsSource) -> BitSet {
    let mut set = evaluate_raw(query, source);
    set.intersect_with(&source.live_docs());
    set
}

fn term_set(term: &Term, source: &dyn PostingsSource) -> BitSet {
    BitSet::from_ordinals(source.max_doc() as usize, source.matching(term))
}

fn evaluate_raw(query: &Query, source: &dyn PostingsSource) -> BitSet {
    let len = source.max_doc() as usize;
    match query {
        Query::All => source.live_docs(),
        Query::Term(term) => term_set(term, source),
        Query::Text { field, text } => {
            let tokens = tokenize_unique(text);
            if tokens.is_empty() {
                return BitSet::new(len);
            }
            let mut set = BitSet::full(len);
            for token in tokens {
                set.intersect_with(&term_set(&Term::new(field.clone(), token), source));
            }
            set
        }
        Query::Aliases(aliases) => {
            let mut set = BitSet::new(len);
            for alias in aliases {
                set.union_with(&term_set(&Term::alias(alias.clone()), source));
            }
            set
        }
        Query::Bool { must, must_not } => {
            let mut set = if must.is_empty() {
                source.live_docs()
            } else {
                BitSet::full(len)
            };
            for clause in must {
                set.intersect_with(&evaluate_raw(clause, source));
            }
            for clause in must_not {
                set.difference_with(&evaluate_raw(clause, source));
            }
            set
        }
    }
}

/// Documents a filter admits for one reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocSet {
    /// No restriction.
    All,
    /// Only these documents.
    Set(BitSet),
}

impl DocSet {
    /// Whether `doc` is admitted.
    pub fn contains(&self, doc: u32) -> bool {
        match self {
            DocSet::All => true,
            DocSet::Set(set) => set.contains(doc),
        }
    }

    /// Intersection of two doc sets.
    pub fn and(self, other: DocSet) -> DocSet {
        match (self, other) {
            (DocSet::All, other) | (other, DocSet::All) => other,
            (DocSet::Set(mut a), DocSet::Set(b)) => {
                a.intersect_with(&b);
                DocSet::Set(a)
            }
        }
    }
}

/// Restricts which documents of a reader are searchable.
pub trait SearchFilter: Send + Sync + Debug {
    /// Admitted documents for `reader`.
    fn doc_set(&self, reader: &IndexReader) -> Result<DocSet>;
}

/// Admits documents matching a query.
#[derive(Debug, Clone)]
pub struct QueryFilter(pub Query);

impl SearchFilter for QueryFilter {
    fn doc_set(&self, reader: &IndexReader) -> Result<DocSet> {
        Ok(DocSet::Set(evaluate(&self.0, reader)))
    }
}

/// Admits documents every inner filter admits.
#[derive(Debug, Clone, Default)]
pub struct AndFilter {
    filters: Vec<Arc<dyn SearchFilter>>,
}

impl AndFilter {
    /// Combine filters.
    pub fn new(filters: Vec<Arc<dyn SearchFilter>>) -> Self {
        AndFilter { filters }
    }

    /// Add one more filter.
    pub fn push(&mut self, filter: Arc<dyn SearchFilter>) {
        self.filters.push(filter);
    }
}

impl SearchFilter for AndFilter {
    fn doc_set(&self, reader: &IndexReader) -> Result<DocSet> {
        let mut set = DocSet::All;
        for filter in &self.filters {
            set = set.and(filter.doc_set(reader)?);
        }
        Ok(set)
    }
}

/// One search result.
#[derive(Debug, Clone)]
pub struct Hit {
    /// Partition the document lives in.
    pub partition: String,
    /// Reader the document number belongs to.
    pub reader: ReaderId,
    /// Document number within that reader.
    pub doc: u32,
    /// Stored document.
    pub document: Arc<Document>,
}

/// Searches a single reader.
#[derive(Debug, Clone)]
pub struct IndexSearcher {
    reader: Arc<IndexReader>,
}

impl IndexSearcher {
    /// Wrap a reader.
    pub fn new(reader: Arc<IndexReader>) -> Self {
        IndexSearcher { reader }
    }

    /// Underlying reader.
    pub fn reader(&self) -> &Arc<IndexReader> {
        &self.reader
    }

    /// Matching document numbers, ascending.
    pub fn search(&self, query: &Query, filter: Option<&dyn SearchFilter>) -> Result<Vec<u32>> {
        let matches = evaluate(query, self.reader.as_ref());
        let admitted = match filter {
            Some(filter) => filter.doc_set(&self.reader)?,
            None => DocSet::All,
        };
        Ok(matches.iter().filter(|&doc| admitted.contains(doc)).collect())
    }
}

/// Searches several partitions as one.
#[derive(Debug, Clone, Default)]
pub struct MultiSearcher {
    readers: Vec<(String, Arc<IndexReader>)>,
}

impl MultiSearcher {
    /// Create from `(partition, reader)` pairs.
    pub fn new(readers: Vec<(String, Arc<IndexReader>)>) -> Self {
        MultiSearcher { readers }
    }

    /// Add one more partition.
    pub fn push(&mut self, partition: impl Into<String>, reader: Arc<IndexReader>) {
        self.readers.push((partition.into(), reader));
    }

    /// Readers being searched.
    pub fn readers(&self) -> &[(String, Arc<IndexReader>)] {
        &self.readers
    }

    /// All hits, partition by partition in insertion order.
    pub fn search(&self, query: &Query, filter: Option<&dyn SearchFilter>) -> Result<Vec<Hit>> {
        let mut hits = Vec::new();
        for (partition, reader) in &self.readers {
            let searcher = IndexSearcher::new(Arc::clone(reader));
            for doc in searcher.search(query, filter)? {
                if let Some(document) = reader.document(doc) {
                    hits.push(Hit {
                        partition: partition.clone(),
                        reader: reader.id(),
                        doc,
                        document,
                    });
                }
            }
        }
        Ok(hits)
    }

    /// Number of hits.
    pub fn count(&self, query: &Query, filter: Option<&dyn SearchFilter>) -> Result<usize> {
        let mut total = 0;
        for (_, reader) in &self.readers {
            total += IndexSearcher::new(Arc::clone(reader))
                .search(query, filter)?
                .len();
        }
        Ok(total)
    }
}
