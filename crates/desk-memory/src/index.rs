//! Knowledge-base view over a [`VectorStore`]: typed records, embedding, and ranked retrieval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use desk_llm::{EmbedFn, LlmError};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::document::Chunk;
use crate::vector_store::{
    FieldValue, ScoredVectorPoint, VectorFilter, VectorPoint, VectorStore, VectorStoreError,
};

pub const DEFAULT_COLLECTION: &str = "articles_store";

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("vector index unavailable: {0}")]
    Unavailable(#[from] VectorStoreError),

    #[error("embedding failed: {0}")]
    Embedding(#[from] LlmError),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub source_id: String,
    pub title: String,
    pub ordinal: usize,
    pub modified_time: String,
}

/// One embedded chunk as stored in the index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub content: String,
    pub metadata: RecordMetadata,
}

impl IndexRecord {
    #[must_use]
    pub fn from_chunk(chunk: Chunk, title: &str, modified_time: &str, vector: Vec<f32>) -> Self {
        Self {
            chunk_id: chunk_id(&chunk.source_id, chunk.ordinal),
            vector,
            content: chunk.text,
            metadata: RecordMetadata {
                source_id: chunk.source_id,
                title: title.to_owned(),
                ordinal: chunk.ordinal,
                modified_time: modified_time.to_owned(),
            },
        }
    }

    fn into_point(self) -> VectorPoint {
        let mut payload = HashMap::from([
            (
                "source_id".to_owned(),
                serde_json::Value::String(self.metadata.source_id),
            ),
            ("title".to_owned(), serde_json::Value::String(self.metadata.title)),
            (
                "ordinal".to_owned(),
                serde_json::Value::from(self.metadata.ordinal),
            ),
            (
                "modified_time".to_owned(),
                serde_json::Value::String(self.metadata.modified_time),
            ),
        ]);
        payload.insert("content".to_owned(), serde_json::Value::String(self.content));
        VectorPoint {
            id: self.chunk_id,
            vector: self.vector,
            payload,
        }
    }
}

/// Deterministic point id for a chunk, stable across re-indexing runs.
#[must_use]
pub fn chunk_id(source_id: &str, ordinal: usize) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{source_id}:{ordinal}").as_bytes()).to_string()
}

/// One retrieval result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub content: String,
    pub metadata: RecordMetadata,
    pub score: f32,
}

impl SearchHit {
    fn from_point(point: ScoredVectorPoint) -> Option<Self> {
        let mut payload = point.payload;
        let content = match payload.remove("content") {
            Some(serde_json::Value::String(s)) => s,
            _ => String::new(),
        };
        let metadata: RecordMetadata =
            serde_json::from_value(serde_json::Value::Object(payload.into_iter().collect()))
                .map_err(|e| tracing::warn!(id = %point.id, "skipping record with bad payload: {e}"))
                .ok()?;
        Some(Self {
            content,
            metadata,
            score: point.score,
        })
    }
}

pub struct KnowledgeIndex {
    store: Arc<dyn VectorStore>,
    collection: String,
    vector_size: usize,
    embed_fn: EmbedFn,
    embed_timeout: Option<Duration>,
    ready: OnceCell<()>,
}

impl std::fmt::Debug for KnowledgeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeIndex")
            .field("collection", &self.collection)
            .field("vector_size", &self.vector_size)
            .finish_non_exhaustive()
    }
}

impl KnowledgeIndex {
    #[must_use]
    pub fn new(
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        vector_size: usize,
        embed_fn: EmbedFn,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            vector_size,
            embed_fn,
            embed_timeout: None,
            ready: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    #[must_use]
    pub fn vector_size(&self) -> usize {
        self.vector_size
    }

    /// Create the collection if absent. Retried on the next call after a failure.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Unavailable`] if the backend cannot be reached.
    pub async fn ensure_ready(&self) -> Result<(), RetrievalError> {
        self.ready
            .get_or_try_init(|| async {
                self.store
                    .ensure_collection(&self.collection, self.vector_size as u64)
                    .await
            })
            .await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if embedding fails, times out, or yields the wrong dimension.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let fut = (self.embed_fn)(text);
        let vector = match self.embed_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| LlmError::Timeout(limit.as_secs()))??,
            None => fut.await?,
        };
        self.check_dimension(&vector)?;
        Ok(vector)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), RetrievalError> {
        if vector.len() == self.vector_size {
            Ok(())
        } else {
            Err(RetrievalError::DimensionMismatch {
                expected: self.vector_size,
                actual: vector.len(),
            })
        }
    }

    fn to_points(&self, records: Vec<IndexRecord>) -> Result<Vec<VectorPoint>, RetrievalError> {
        records
            .into_iter()
            .map(|r| {
                self.check_dimension(&r.vector)?;
                Ok(r.into_point())
            })
            .collect()
    }

    /// Insert or overwrite records by chunk id.
    ///
    /// # Errors
    ///
    /// Returns an error on dimension mismatch or backend failure.
    pub async fn upsert(&self, records: Vec<IndexRecord>) -> Result<(), RetrievalError> {
        let points = self.to_points(records)?;
        self.ensure_ready().await?;
        self.store.upsert(&self.collection, points).await?;
        Ok(())
    }

    /// Supersede every record of `source_id` with `records` in one batch.
    ///
    /// # Errors
    ///
    /// Returns an error on dimension mismatch or backend failure.
    pub async fn replace_source(
        &self,
        source_id: &str,
        records: Vec<IndexRecord>,
    ) -> Result<(), RetrievalError> {
        let points = self.to_points(records)?;
        self.ensure_ready().await?;
        self.store
            .replace(&self.collection, source_filter(source_id), points)
            .await?;
        Ok(())
    }

    /// Top-`k` records by descending cosine similarity, ties by ascending chunk id.
    ///
    /// # Errors
    ///
    /// Returns an error on dimension mismatch or backend failure.
    pub async fn search(
        &self,
        query_vector: Vec<f32>,
        k: usize,
    ) -> Result<Vec<SearchHit>, RetrievalError> {
        self.check_dimension(&query_vector)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        self.ensure_ready().await?;
        let points = self
            .store
            .search(&self.collection, query_vector, k as u64, None)
            .await?;
        Ok(points.into_iter().filter_map(SearchHit::from_point).collect())
    }

    /// Embed `query` and search.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding or search fails.
    pub async fn search_text(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<SearchHit>, RetrievalError> {
        let vector = self.embed(query).await?;
        self.search(vector, k).await
    }

    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn source_record_count(&self, source_id: &str) -> Result<u64, RetrievalError> {
        self.ensure_ready().await?;
        Ok(self
            .store
            .count(&self.collection, Some(source_filter(source_id)))
            .await?)
    }

    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn record_count(&self) -> Result<u64, RetrievalError> {
        self.ensure_ready().await?;
        Ok(self.store.count(&self.collection, None).await?)
    }
}

fn source_filter(source_id: &str) -> VectorFilter {
    VectorFilter::field_eq("source_id", FieldValue::Text(source_id.to_owned()))
}
