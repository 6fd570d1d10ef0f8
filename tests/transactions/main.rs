//! Transaction Integration Tests
//!
//! Read-committed transactions end to end: overlays, delete visibility,
//! background job workers, flush-commit and the other processors.

#[path = "../common/mod.rs"]
mod common;

mod concurrent_jobs;
mod delete_visibility;
mod disk;
mod flush_commit;
mod isolation;
mod processors;
mod properties;
mod read_your_writes;
