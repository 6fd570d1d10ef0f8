//! Core types for Vellum
//!
//! This crate defines the foundational types shared by the storage and
//! transaction layers:
//! - ResourceKey / Resource: logical document identity and content
//! - TransactionJob: immutable dirty operations
//! - Document / Term: what the index stores
//! - Query: term and keyword queries
//! - VellumConfig: `vellum.toml` settings
//! - Error: error type hierarchy
//! - IdGenerator: injected unique-name source

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod document;
pub mod error;
pub mod id;
pub mod job;
pub mod query;
pub mod resource;

pub use config::{
    IndexConfig, LogLocation, ProcessorKind, TransactionConfig, VellumConfig, CONFIG_FILE_NAME,
};
pub use document::{Document, Field, FieldKind, Term, ALIAS_FIELD, UID_FIELD};
pub use error::{Error, Result};
pub use id::{IdGenerator, SequentialIds, UuidIds};
pub use job::{Hashing, JobKind, TransactionJob};
pub use query::Query;
pub use resource::{PartitionScheme, Property, Resource, ResourceKey};
