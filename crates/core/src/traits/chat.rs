//! Chat model seam
//!
//! One capability trait covers both configured model instances: the cheap
//! intent analyzer and the main response generator. Streaming hands tokens
//! to an mpsc sender; a closed receiver means the caller went away and the
//! implementation must stop generating.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatRole::System => write!(f, "system"),
            ChatRole::User => write!(f, "user"),
            ChatRole::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling and sizing knobs for one completion call
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: String,
    pub usage: TokenUsage,
    pub finish_reason: FinishReason,
}

/// A chat-completion model instance
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Single blocking completion
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Streaming completion; every token is sent on `tx` as it arrives.
    /// Returns the full accumulated response when the stream ends. When
    /// the receiver is dropped the call finishes with
    /// [`FinishReason::Cancelled`].
    async fn complete_streaming(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<ChatResponse>;

    fn model_name(&self) -> &str;
}
