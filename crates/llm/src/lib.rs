//! LLM integration
//!
//! Features:
//! - OpenAI-compatible chat backend with blocking and SSE streaming calls
//! - Two configured model instances over one backend (cheap intent
//!   analyzer, main response generator)
//! - Intent analysis with structured JSON output and defaults on failure
//! - Ordered system-prompt assembly for the response generator
//! - Single-pass response review
//! - Global token-bucket rate limiting

pub mod backend;
pub mod intent;
pub mod prompt;
pub mod rate_limit;
pub mod reviewer;

pub use backend::{OpenAiBackend, OpenAiBackendConfig};
pub use intent::IntentAnalyzer;
pub use prompt::{ContextChunk, PromptInputs, PromptTemplates, ResponsePromptBuilder};
pub use rate_limit::TokenBucket;
pub use reviewer::{ReviewVerdict, Reviewer};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("rate limited")]
    RateLimited,
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Network(err.to_string())
    }
}

impl From<LlmError> for wiki_agent_core::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::RateLimited => wiki_agent_core::Error::RateLimited,
            other => wiki_agent_core::Error::LlmUnavailable(other.to_string()),
        }
    }
}
