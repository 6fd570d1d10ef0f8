//! Immutable index segments (`seg_<id>.seg`)
//!
//! A segment is a batch of documents written once and never modified.
//! Deletions are tracked outside the segment, in the commit point. Postings
//! are not persisted: they are rebuilt from the stored documents when a
//! segment is loaded, so the file only carries the documents.
//!
//! ## File Format
//!
//! ```text
//! HEADER (16 bytes):
//!   magic "VSEG"           4B
//!   version                u32 LE
//!   payload_len            u32 LE
//!   crc32(payload)         u32 LE
//! PAYLOAD:
//!   MessagePack { id: u64, docs: [Document] }
//! ```

use crate::search::PostingsSource;
use crate::tokenizer::tokenize;
use crate::BitSet;
use crate::Directory;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use vellum_core::{Document, Error, FieldKind, Result, Term};

const SEG_MAGIC: &[u8; 4] = b"VSEG";
const SEG_VERSION: u32 = 1;
const HEADER_SIZE: usize = 16;

#[derive(Serialize)]
struct SegmentFileRef<'a> {
    id: u64,
    docs: Vec<&'a Document>,
}

#[derive(Deserialize)]
struct SegmentFile {
    id: u64,
    docs: Vec<Document>,
}

/// Terms a field contributes to the index.
pub(crate) fn analyze(kind: FieldKind, value: &str) -> Vec<String> {
    match kind {
        FieldKind::Text => tokenize(value),
        FieldKind::Keyword => vec![value.to_string()],
        FieldKind::Stored => Vec::new(),
    }
}

/// An immutable batch of documents with in-memory postings.
pub struct Segment {
    id: u64,
    docs: Vec<Arc<Document>>,
    postings: FxHashMap<Term, Vec<u32>>,
}

impl Segment {
    /// Build a segment, computing postings for every indexed field.
    pub fn build(id: u64, docs: Vec<Arc<Document>>) -> Self {
        let mut postings: FxHashMap<Term, Vec<u32>> = FxHashMap::default();
        for (ord, doc) in docs.iter().enumerate() {
            for field in doc.fields() {
                for token in analyze(field.kind, &field.value) {
                    let list = postings.entry(Term::new(field.name.clone(), token)).or_default();
                    // Tokens repeat within a field; keep each ordinal once
                    if list.last() != Some(&(ord as u32)) {
                        list.push(ord as u32);
                    }
                }
            }
        }
        Segment { id, docs, postings }
    }

    /// File name for a segment id.
    pub fn file_name(id: u64) -> String {
        format!("seg_{}.seg", id)
    }

    /// Parse a segment id out of a file name.
    pub fn parse_file_name(name: &str) -> Option<u64> {
        name.strip_prefix("seg_")?.strip_suffix(".seg")?.parse().ok()
    }

    /// Segment id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of documents, deleted or not.
    pub fn doc_count(&self) -> u32 {
        self.docs.len() as u32
    }

    /// Document by segment-local ordinal.
    pub fn document(&self, ord: u32) -> Option<&Arc<Document>> {
        self.docs.get(ord as usize)
    }

    /// All documents in ordinal order.
    pub fn documents(&self) -> &[Arc<Document>] {
        &self.docs
    }

    /// Segment-local ordinals containing `term`, ascending.
    pub fn postings(&self, term: &Term) -> &[u32] {
        self.postings.get(term).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Serialize with header and checksum.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = rmp_serde::to_vec(&SegmentFileRef {
            id: self.id,
            docs: self.docs.iter().map(|d| d.as_ref()).collect(),
        })?;
        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(SEG_MAGIC);
        buf.extend_from_slice(&SEG_VERSION.to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Parse and verify a serialized segment.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::Corruption("segment too small".to_string()));
        }
        if &bytes[0..4] != SEG_MAGIC {
            return Err(Error::Corruption("bad segment magic".to_string()));
        }
        let version = read_u32(bytes, 4);
        if version != SEG_VERSION {
            return Err(Error::Corruption(format!(
                "unsupported segment version {}",
                version
            )));
        }
        let len = read_u32(bytes, 8) as usize;
        let crc = read_u32(bytes, 12);
        let payload = bytes
            .get(HEADER_SIZE..HEADER_SIZE + len)
            .ok_or_else(|| Error::Corruption("truncated segment".to_string()))?;
        if crc32fast::hash(payload) != crc {
            return Err(Error::Corruption("segment checksum mismatch".to_string()));
        }
        let file: SegmentFile = rmp_serde::from_slice(payload)?;
        Ok(Segment::build(
            file.id,
            file.docs.into_iter().map(Arc::new).collect(),
        ))
    }

    /// Write to `dir` under its file name.
    pub fn write_to(&self, dir: &dyn Directory) -> Result<()> {
        dir.write(&Self::file_name(self.id), &self.encode()?)
    }

    /// Load segment `id` from `dir`.
    pub fn read_from(dir: &dyn Directory, id: u64) -> Result<Self> {
        let segment = Self::decode(&dir.read(&Self::file_name(id))?)?;
        if segment.id != id {
            return Err(Error::Corruption(format!(
                "segment file {} holds segment {}",
                Self::file_name(id),
                segment.id
            )));
        }
        Ok(segment)
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(word)
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("docs", &self.docs.len())
            .field("terms", &self.postings.len())
            .finish()
    }
}

impl PostingsSource for Segment {
    fn max_doc(&self) -> u32 {
        self.doc_count()
    }

    fn matching(&self, term: &Term) -> Vec<u32> {
        self.postings(term).to_vec()
    }

    fn live_docs(&self) -> BitSet {
        BitSet::full(self.docs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RamDirectory;
    use vellum_core::FieldKind;

    fn doc(uid: &str, body: &str) -> Arc<Document> {
        Arc::new(
            Document::new()
                .with("$/uid", uid, FieldKind::Keyword)
                .with("body", body, FieldKind::Text)
                .with("note", "stored only", FieldKind::Stored),
        )
    }

    #[test]
    fn test_build_postings() {
        let seg = Segment::build(1, vec![doc("a", "red red fox"), doc("b", "blue fox")]);
        assert_eq!(seg.postings(&Term::new("body", "fox")), &[0, 1]);
        assert_eq!(seg.postings(&Term::new("body", "red")), &[0]);
        assert_eq!(seg.postings(&Term::new("$/uid", "b")), &[1]);
        assert!(seg.postings(&Term::new("note", "stored")).is_empty());
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = RamDirectory::new("seg");
        let seg = Segment::build(7, vec![doc("a", "hello world")]);
        seg.write_to(&dir).unwrap();

        let loaded = Segment::read_from(&dir, 7).unwrap();
        assert_eq!(loaded.id(), 7);
        assert_eq!(loaded.doc_count(), 1);
        assert_eq!(loaded.document(0).unwrap().get("$/uid"), Some("a"));
        assert_eq!(loaded.postings(&Term::new("body", "hello")), &[0]);
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let seg = Segment::build(1, vec![doc("a", "hello")]);
        let mut bytes = seg.encode().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(Segment::decode(&bytes), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_bad_magic() {
        let bytes = vec![0u8; 32];
        assert!(matches!(Segment::decode(&bytes), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_file_name_round_trip() {
        assert_eq!(Segment::parse_file_name(&Segment::file_name(42)), Some(42));
        assert_eq!(Segment::parse_file_name("segments_3"), None);
    }
}
