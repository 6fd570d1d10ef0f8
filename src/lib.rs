//! Vellum - embedded search engine with read-committed transactions
//!
//! Vellum stores resources in a partitioned inverted index and gives every
//! transaction its own view: writes land in private overlay indexes, deletes
//! are hidden by a per-transaction visibility filter, and nothing becomes
//! visible to other transactions until commit.
//!
//! # Quick Start
//!
//! ```ignore
//! use vellum::{PartitionScheme, Query, Resource, ResourceKey, SearchEngine, VellumConfig};
//!
//! let engine = SearchEngine::in_memory(VellumConfig::default())?;
//! let key = ResourceKey::single("Doc", "1", &PartitionScheme::Alias);
//!
//! let tx = engine.begin()?;
//! tx.create(Resource::new(key.clone()).text("body", "hello world"))?;
//! assert_eq!(tx.find(&Query::alias("Doc"))?.len(), 1);   // read your own writes
//! tx.commit()?;
//!
//! assert!(engine.get(&key)?.is_some());
//! ```
//!
//! # Architecture
//!
//! - `vellum-core`: resource keys, jobs, queries, configuration, errors
//! - `vellum-storage`: directories, segments, writers, readers, search
//! - `vellum-engine`: overlays, visibility filter, job workers, processors

pub use vellum_core::{
    Document, Error, FieldKind, Hashing, IdGenerator, IndexConfig, LogLocation, PartitionScheme,
    ProcessorKind, Property, Query, Resource, ResourceKey, Result, SequentialIds, Term,
    TransactionConfig, TransactionJob, UuidIds, VellumConfig, CONFIG_FILE_NAME,
};
pub use vellum_engine::{
    SearchEngine, Transaction, TransactionFactory, TransactionProcessor, TransactionState,
    VisibilityFilter,
};
pub use vellum_storage::{Hit, IndexStore, QueryFilter, SearchFilter};
