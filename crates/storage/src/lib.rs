//! Storage layer for Vellum
//!
//! A small segmented inverted index, enough to back the transaction layer:
//! - Directory: named blobs plus advisory locks (RAM or file system)
//! - Segment / CommitPoint: immutable segments and published generations
//! - IndexWriter: buffered adds, eager deletes, commit, abort, merges
//! - IndexReader: point-in-time snapshots with stable document numbers
//! - Search: query evaluation, filters, single and multi-partition searchers
//! - IndexStore: per-partition directories and a refreshing reader cache
//! - TaskExecutor: injected thread pools for merges and job workers

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod background;
pub mod bitset;
pub mod directory;
pub mod manifest;
pub mod merge;
pub mod reader;
pub mod search;
pub mod segment;
pub mod store;
pub mod tokenizer;
pub mod writer;

pub use background::{
    ExecutorStats, InlineExecutor, SpawnExecutor, Task, TaskExecutor, ThreadPoolExecutor,
};
pub use bitset::BitSet;
pub use directory::{obtain_lock, Directory, DirectoryLock, FsDirectory, RamDirectory};
pub use manifest::{CommitPoint, SegmentEntry};
pub use merge::{MergeOutcome, MergeScheduler, MergeTask};
pub use reader::{IndexReader, ReaderId, ReaderOptions};
pub use search::{
    evaluate, AndFilter, DocSet, Hit, IndexSearcher, MultiSearcher, PostingsSource, QueryFilter,
    SearchFilter,
};
pub use segment::Segment;
pub use store::IndexStore;
pub use writer::{IndexWriter, WriterOptions};
