use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;

use super::chunker::DocumentChunker;
use super::error::DocumentError;
use super::source::DocumentSource;
use super::types::{
    IndexReport, IndexingFailure, IndexingResult, PDF_MIME, SourceDocument, SourceEntry,
};
use crate::index::{IndexRecord, KnowledgeIndex};

pub const DEFAULT_CONCURRENCY: usize = 4;

/// Lists, fetches, chunks, embeds and stores documents from a [`DocumentSource`].
pub struct IndexingPipeline {
    source: Arc<dyn DocumentSource>,
    index: Arc<KnowledgeIndex>,
    chunker: DocumentChunker,
    concurrency: usize,
}

impl IndexingPipeline {
    #[must_use]
    pub fn new(
        source: Arc<dyn DocumentSource>,
        index: Arc<KnowledgeIndex>,
        chunker: DocumentChunker,
    ) -> Self {
        Self {
            source,
            index,
            chunker,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Index every document in `folder`, returning only the successes.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Listing`] if the folder cannot be listed.
    pub async fn index_all(&self, folder: &str) -> Result<Vec<IndexingResult>, DocumentError> {
        Ok(self.run(folder).await?.results)
    }

    /// Index every document in `folder`. Per-document failures are logged and collected;
    /// the run continues. Results keep listing order.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Listing`] if the folder cannot be listed.
    pub async fn run(&self, folder: &str) -> Result<IndexReport, DocumentError> {
        let started_at = Utc::now();
        let entries = self.source.list(folder).await.map_err(|e| match e {
            DocumentError::Listing(_) => e,
            other => DocumentError::Listing(other.to_string()),
        })?;
        tracing::info!(
            folder,
            source = self.source.name(),
            documents = entries.len(),
            "starting indexing run"
        );

        let outcomes: Vec<(SourceEntry, Result<IndexingResult, DocumentError>)> =
            futures::stream::iter(entries)
                .map(|entry| async move {
                    let outcome = self.index_entry(&entry).await;
                    (entry, outcome)
                })
                .buffered(self.concurrency)
                .collect()
                .await;

        let mut results = Vec::new();
        let mut failures = Vec::new();
        for (entry, outcome) in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::error!(
                        source_id = %entry.id,
                        title = %entry.title,
                        "failed to index document: {e}"
                    );
                    failures.push(IndexingFailure {
                        source_id: entry.id,
                        title: entry.title,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let report = IndexReport {
            results,
            failures,
            started_at,
            finished_at: Utc::now(),
        };
        tracing::info!(
            indexed = report.results.len(),
            failed = report.failures.len(),
            chunks = report.chunk_total(),
            "indexing run finished"
        );
        Ok(report)
    }

    /// Fetch and index one listed document.
    ///
    /// # Errors
    ///
    /// Returns an error if fetching, extraction, embedding or storage fails.
    pub async fn index_entry(&self, entry: &SourceEntry) -> Result<IndexingResult, DocumentError> {
        let document = self.source.fetch(entry).await?;
        self.index_document(document).await
    }

    /// Chunk, embed and store an already fetched document, superseding its previous records.
    ///
    /// # Errors
    ///
    /// Returns an error if extraction yields no text, or embedding or storage fails.
    pub async fn index_document(
        &self,
        document: SourceDocument,
    ) -> Result<IndexingResult, DocumentError> {
        let text = extract(&document).await?;
        let chunks = self.chunker.split_chunks(&document.id, &text);
        if chunks.is_empty() {
            return Err(DocumentError::EmptyContent(document.id));
        }

        let mut records = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let vector = self.index.embed(&chunk.text).await?;
            records.push(IndexRecord::from_chunk(
                chunk,
                &document.title,
                &document.modified_time,
                vector,
            ));
        }

        let chunk_count = records.len();
        self.index.replace_source(&document.id, records).await?;
        tracing::info!(
            source_id = %document.id,
            title = %document.title,
            chunk_count,
            "indexed document"
        );

        Ok(IndexingResult {
            source_id: document.id,
            title: document.title,
            modified_time: document.modified_time,
            chunk_count,
        })
    }
}

async fn extract(document: &SourceDocument) -> Result<String, DocumentError> {
    match document.mime_type.as_str() {
        PDF_MIME => super::pdf::extract_text(document.raw_content.clone()).await,
        mime if mime.starts_with("text/") => {
            Ok(String::from_utf8_lossy(&document.raw_content).into_owned())
        }
        other => Err(DocumentError::UnsupportedFormat(other.to_owned())),
    }
}
