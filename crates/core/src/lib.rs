//! Core traits and types for the wiki assistant
//!
//! This crate provides foundational types used across all other crates:
//! - Documents, chunks and source kinds
//! - Alias edges learned between terms
//! - Conversations and messages
//! - Intent plans produced by the cheap analyzer model
//! - Conflicts and quality reports
//! - The newline-delimited frame protocol spoken on the answer stream
//! - Traits for pluggable backends (embeddings, vector index, chat models)
//! - Error types with wire-level error codes

pub mod alias;
pub mod conversation;
pub mod document;
pub mod error;
pub mod frame;
pub mod intent;
pub mod quality;
pub mod text;
pub mod traits;

pub use alias::{AliasEdge, AliasKind};
pub use conversation::{Conversation, Message, MessageRole};
pub use document::{chunk_point_id, Chunk, Document, SourceKind};
pub use error::{Error, ErrorCode, Result};
pub use frame::{
    AnswerRequest, ConflictItem, Frame, SourceItem, StepPhase, TokenCounts, MAX_AUTHORS_NOTE_CHARS,
    MAX_QUERY_CHARS,
};
pub use intent::{
    ConversationType, IntentPlan, IntentType, MentionedEntities, ResponseDepth, ResponseFormat,
    ResponseStyle,
};
pub use quality::{Conflict, ConflictKind, ConflictSeverity, QualityReport};
pub use traits::{
    ChatMessage, ChatModel, ChatRequest, ChatResponse, ChatRole, EmbeddingClient, FinishReason,
    IndexFilter, ChunkPayload, ScrollPage, SearchHit, TokenUsage, VectorIndex, VectorPoint,
};
