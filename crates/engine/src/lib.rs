//! Transactional layer for Vellum
//!
//! This crate orchestrates the storage layer into transactions:
//! - VisibilityFilter: per-reader bitsets hiding documents deleted in a transaction
//! - TransIndex / TransIndexManager: per-partition overlay indexes for uncommitted writes
//! - ConcurrentJobProcessor: hash-routed worker queues for dirty operations
//! - Processors: read-committed, direct-writer, batch-insert and search-only
//! - SearchEngine / Transaction: the public entry points
//!
//! The engine is the only component that knows about:
//! - Transaction lifecycle (begin, prepare, commit, rollback)
//! - Combining the main store with overlays at search time

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod factory;
pub mod filter;
pub mod jobs;
pub mod processor;
pub mod trans_index;
pub mod trans_manager;

pub use engine::{SearchEngine, Transaction};
pub use factory::TransactionFactory;
pub use filter::VisibilityFilter;
pub use jobs::{ConcurrentJobProcessor, JobApplier, JobProcessorOptions, WorkerState};
pub use processor::{
    BatchInsertProcessor, DirectWriterProcessor, ProcessorContext, ReadCommittedProcessor,
    SearchOnlyProcessor, TransactionProcessor, TransactionState,
};
pub use trans_index::{OverlaySettings, TransIndex};
pub use trans_manager::TransIndexManager;
