//! Commit points (`segments_<generation>`)
//!
//! A commit point lists the segments of one published index generation and
//! the deleted ordinals (tombstones) of each. Readers open the highest
//! generation present; writers publish by writing the next one. Older
//! generations are removed after a successful publish.
//!
//! Format: magic `VCMT` + version (u32 LE) + MessagePack payload. Writes go
//! through [`Directory::write`], which replaces atomically.

use crate::Directory;
use serde::{Deserialize, Serialize};
use vellum_core::{Error, Result};

const COMMIT_MAGIC: &[u8; 4] = b"VCMT";
const COMMIT_VERSION: u32 = 1;
const COMMIT_PREFIX: &str = "segments_";

/// One segment as recorded in a commit point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentEntry {
    /// Segment id.
    pub id: u64,
    /// Documents in the segment, deleted or not.
    pub doc_count: u32,
    /// Deleted segment-local ordinals, ascending.
    pub deleted: Vec<u32>,
}

/// A published index generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitPoint {
    /// Generation number, starting at 1.
    pub generation: u64,
    /// Next segment id to assign.
    pub next_segment_id: u64,
    /// Segments in ordinal order.
    pub segments: Vec<SegmentEntry>,
}

impl CommitPoint {
    /// File name for a generation.
    pub fn file_name(generation: u64) -> String {
        format!("{}{}", COMMIT_PREFIX, generation)
    }

    /// Parse a generation out of a file name.
    pub fn parse_file_name(name: &str) -> Option<u64> {
        name.strip_prefix(COMMIT_PREFIX)?.parse().ok()
    }

    /// Live documents across all segments.
    pub fn live_docs(&self) -> u64 {
        self.segments
            .iter()
            .map(|s| u64::from(s.doc_count) - s.deleted.len() as u64)
            .sum()
    }
}

/// Highest generation present in `dir`, if any.
pub fn latest_generation(dir: &dyn Directory) -> Result<Option<u64>> {
    Ok(dir
        .list()?
        .iter()
        .filter_map(|name| CommitPoint::parse_file_name(name))
        .max())
}

/// Write a commit point.
pub fn write_commit(dir: &dyn Directory, commit: &CommitPoint) -> Result<()> {
    let payload = rmp_serde::to_vec(commit)?;
    let mut buf = Vec::with_capacity(8 + payload.len());
    buf.extend_from_slice(COMMIT_MAGIC);
    buf.extend_from_slice(&COMMIT_VERSION.to_le_bytes());
    buf.extend_from_slice(&payload);
    dir.write(&CommitPoint::file_name(commit.generation), &buf)
}

/// Read a specific generation.
pub fn read_commit(dir: &dyn Directory, generation: u64) -> Result<CommitPoint> {
    let buf = dir.read(&CommitPoint::file_name(generation))?;
    if buf.len() < 8 {
        return Err(Error::Corruption("commit point too small".to_string()));
    }
    if &buf[0..4] != COMMIT_MAGIC {
        return Err(Error::Corruption("bad commit point magic".to_string()));
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&buf[4..8]);
    let version = u32::from_le_bytes(version);
    if version != COMMIT_VERSION {
        return Err(Error::Corruption(format!(
            "unsupported commit point version {}",
            version
        )));
    }
    let commit: CommitPoint = rmp_serde::from_slice(&buf[8..])?;
    if commit.generation != generation {
        return Err(Error::Corruption(format!(
            "{} holds generation {}",
            CommitPoint::file_name(generation),
            commit.generation
        )));
    }
    Ok(commit)
}

/// Read the latest commit point, if the index has ever been committed.
pub fn read_latest(dir: &dyn Directory) -> Result<Option<CommitPoint>> {
    match latest_generation(dir)? {
        Some(generation) => read_commit(dir, generation).map(Some),
        None => Ok(None),
    }
}
