//! Error types and wire-level error codes

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used across the workspace
pub type Result<T> = std::result::Result<T, Error>;

/// Error codes surfaced on the wire in `error` frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    ConversationBusy,
    RetrievalUnavailable,
    EmbeddingError,
    LLMUnavailable,
    RateLimited,
    InternalError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::BadRequest => "BadRequest",
            ErrorCode::Unauthorized => "Unauthorized",
            ErrorCode::ConversationBusy => "ConversationBusy",
            ErrorCode::RetrievalUnavailable => "RetrievalUnavailable",
            ErrorCode::EmbeddingError => "EmbeddingError",
            ErrorCode::LLMUnavailable => "LLMUnavailable",
            ErrorCode::RateLimited => "RateLimited",
            ErrorCode::InternalError => "InternalError",
        };
        write!(f, "{}", s)
    }
}

/// Top-level error for the assistant core
#[derive(Error, Debug)]
pub enum Error {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    /// Another writer holds the per-conversation lock
    #[error("conversation {0} is busy")]
    ConversationBusy(String),

    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("llm unavailable: {0}")]
    LlmUnavailable(String),

    #[error("rate limited")]
    RateLimited,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map to the wire-level code carried by `error` frames
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::BadRequest(_) => ErrorCode::BadRequest,
            Error::Unauthorized => ErrorCode::Unauthorized,
            Error::ConversationBusy(_) => ErrorCode::ConversationBusy,
            Error::RetrievalUnavailable(_) => ErrorCode::RetrievalUnavailable,
            Error::Embedding(_) => ErrorCode::EmbeddingError,
            Error::LlmUnavailable(_) => ErrorCode::LLMUnavailable,
            Error::RateLimited => ErrorCode::RateLimited,
            Error::Storage(_) => ErrorCode::InternalError,
            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Transient errors are worth retrying locally before they escape
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Embedding(_) | Error::LlmUnavailable(_) | Error::RetrievalUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_serializes_as_pascal_case() {
        let json = serde_json::to_string(&ErrorCode::RetrievalUnavailable).unwrap();
        assert_eq!(json, "\"RetrievalUnavailable\"");
        let json = serde_json::to_string(&ErrorCode::LLMUnavailable).unwrap();
        assert_eq!(json, "\"LLMUnavailable\"");
    }

    #[test]
    fn error_maps_to_code() {
        assert_eq!(
            Error::ConversationBusy("c1".into()).code(),
            ErrorCode::ConversationBusy
        );
        assert_eq!(Error::Storage("down".into()).code(), ErrorCode::InternalError);
    }
}
