use chrono::{DateTime, Utc};
use serde::Serialize;

pub const PDF_MIME: &str = "application/pdf";

/// A candidate document as reported by a [`DocumentSource`](super::DocumentSource) listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub id: String,
    pub title: String,
    pub modified_time: String,
    pub mime_type: String,
}

/// Raw bytes of one document, fixed for the duration of an indexing pass.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub id: String,
    pub title: String,
    pub modified_time: String,
    pub mime_type: String,
    pub raw_content: Vec<u8>,
}

impl SourceDocument {
    #[must_use]
    pub fn from_entry(entry: &SourceEntry, raw_content: Vec<u8>) -> Self {
        Self {
            id: entry.id.clone(),
            title: entry.title.clone(),
            modified_time: entry.modified_time.clone(),
            mime_type: entry.mime_type.clone(),
            raw_content,
        }
    }
}

/// A window of a document's whitespace-normalised text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub source_id: String,
    /// 0-based, contiguous within a document.
    pub ordinal: usize,
    pub text: String,
    /// Char offset of the first token in the normalised text.
    pub char_offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexingResult {
    pub source_id: String,
    pub title: String,
    pub modified_time: String,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexingFailure {
    pub source_id: String,
    pub title: String,
    pub reason: String,
}

/// Outcome of one indexing run.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub results: Vec<IndexingResult>,
    pub failures: Vec<IndexingFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl IndexReport {
    #[must_use]
    pub fn chunk_total(&self) -> usize {
        self.results.iter().map(|r| r.chunk_count).sum()
    }
}
