pub mod chunker;
pub mod error;
pub mod pdf;
pub mod pipeline;
pub mod source;
pub mod types;

pub use chunker::{ChunkerConfig, ChunkerError, DocumentChunker};
pub use error::DocumentError;
pub use pipeline::IndexingPipeline;
pub use source::{DirectorySource, DocumentSource, DriveSource};
pub use types::{
    Chunk, IndexReport, IndexingFailure, IndexingResult, PDF_MIME, SourceDocument, SourceEntry,
};
