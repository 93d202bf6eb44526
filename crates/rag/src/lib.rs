//! Retrieval engine
//!
//! Features:
//! - HTTP embedding client with retry, warm-up and an exact-string cache
//! - Qdrant-backed vector index plus an in-memory index for tests
//! - Tantivy BM25 keyword search over chunk text
//! - Alias registry with automatic relationship discovery and decay
//! - Hybrid retrieval: query expansion, weighted scoring, staged precision
//! - Ingest pipeline: chunk, embed, upsert, re-run alias discovery

pub mod alias;
pub mod chunker;
pub mod embeddings;
pub mod ingest;
pub mod retriever;
pub mod sparse_search;
pub mod vector_index;

pub use alias::{AliasDiscovery, AliasRegistry, DiscoveredEdge};
pub use chunker::{ChunkerConfig, SectionChunker};
pub use embeddings::{CachedEmbedder, DeterministicEmbedder, HttpEmbedder, HttpEmbedderConfig};
pub use ingest::{IngestPipeline, IngestReport};
pub use retriever::{RetrievalOutcome, Retriever, RetrieverConfig, ScoredChunk};
pub use sparse_search::{KeywordHit, KeywordIndex};
pub use vector_index::{InMemoryVectorIndex, QdrantIndex, QdrantIndexConfig};

use thiserror::Error;

/// Retrieval errors
#[derive(Error, Debug)]
pub enum RagError {
    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("vector index error: {0}")]
    VectorIndex(String),

    #[error("keyword index error: {0}")]
    KeywordIndex(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("retrieval unavailable: {0}")]
    Unavailable(String),
}

impl From<RagError> for wiki_agent_core::Error {
    fn from(err: RagError) -> Self {
        match err {
            RagError::Embedding(msg) => wiki_agent_core::Error::Embedding(msg),
            RagError::Unavailable(msg) | RagError::VectorIndex(msg) => {
                wiki_agent_core::Error::RetrievalUnavailable(msg)
            }
            RagError::KeywordIndex(msg) => wiki_agent_core::Error::Internal(msg),
            RagError::Storage(msg) => wiki_agent_core::Error::Storage(msg),
        }
    }
}

impl From<wiki_agent_persistence::PersistenceError> for RagError {
    fn from(err: wiki_agent_persistence::PersistenceError) -> Self {
        RagError::Storage(err.to_string())
    }
}
