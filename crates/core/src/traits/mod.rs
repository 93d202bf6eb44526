//! Traits for pluggable backends
//!
//! The orchestrator and retrieval engine are written against these seams so
//! that production backends (HTTP embedding service, Qdrant, the hosted
//! chat API) and test doubles are interchangeable.

mod chat;
mod embedding;
mod vector_index;

pub use chat::{
    ChatMessage, ChatModel, ChatRequest, ChatResponse, ChatRole, FinishReason, TokenUsage,
};
pub use embedding::EmbeddingClient;
pub use vector_index::{ChunkPayload, IndexFilter, ScrollPage, SearchHit, VectorIndex, VectorPoint};
