use crate::index::RetrievalError;

use super::chunker::ChunkerError;

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to list documents: {0}")]
    Listing(String),

    #[error("failed to fetch {source_id}: {reason}")]
    Fetch { source_id: String, reason: String },

    #[error("document {0} has no extractable text")]
    EmptyContent(String),

    #[error("unsupported content type: {0}")]
    UnsupportedFormat(String),

    #[error("PDF error: {0}")]
    Pdf(String),

    #[error(transparent)]
    Chunker(#[from] ChunkerError),

    #[error("embedding failed: {0}")]
    Embedding(#[from] desk_llm::LlmError),

    #[error("storage error: {0}")]
    Storage(RetrievalError),
}

impl From<RetrievalError> for DocumentError {
    fn from(e: RetrievalError) -> Self {
        match e {
            RetrievalError::Embedding(inner) => Self::Embedding(inner),
            other => Self::Storage(other),
        }
    }
}
