//! Document chunking, vector indexing (local file or Qdrant), and bounded session memory.

pub mod document;
pub mod index;
pub mod local_store;
pub mod qdrant_ops;
pub mod session;
pub mod vector_store;

pub use index::{IndexRecord, KnowledgeIndex, RecordMetadata, RetrievalError, SearchHit};
pub use local_store::LocalVectorStore;
pub use qdrant_ops::QdrantOps;
pub use session::{
    ChatMessage, ChatRole, Clock, ManualClock, SessionHistory, SessionMemoryStore, SystemClock,
};
pub use vector_store::{
    BoxFuture, FieldCondition, FieldValue, ScoredVectorPoint, VectorFilter, VectorPoint, VectorStore,
    VectorStoreError,
};
