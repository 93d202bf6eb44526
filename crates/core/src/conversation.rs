//! Conversations and messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::frame::{SourceItem, TokenCounts};

/// Role of a message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            other => Err(format!("unknown message role: {}", other)),
        }
    }
}

/// A conversation between one user and the assistant.
///
/// At most one conversation per user is active at a time. Closing a
/// conversation only flips `active`; rows are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    /// Fixed to "company" for the documentation assistant
    pub mode: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub active: bool,
    /// Rolling narrative standing in for turns older than the verbatim window
    pub summary: Option<String>,
}

impl Conversation {
    pub fn new(id: String, user_id: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id,
            mode: "company".to_string(),
            created_at: now,
            last_activity: now,
            active: true,
            summary: None,
        }
    }
}

/// An append-only message within a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Sources cited by an assistant turn
    #[serde(default)]
    pub sources: Vec<SourceItem>,
    pub confidence: Option<f32>,
    /// Reasoning-step messages emitted while producing this turn
    #[serde(default)]
    pub thinking_steps: Vec<String>,
    pub token_counts: Option<TokenCounts>,
}

impl Message {
    pub fn user(id: String, conversation_id: String, content: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            conversation_id,
            role: MessageRole::User,
            content,
            created_at: now,
            sources: Vec::new(),
            confidence: None,
            thinking_steps: Vec::new(),
            token_counts: None,
        }
    }

    pub fn assistant(id: String, conversation_id: String, content: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            conversation_id,
            role: MessageRole::Assistant,
            content,
            created_at: now,
            sources: Vec::new(),
            confidence: None,
            thinking_steps: Vec::new(),
            token_counts: None,
        }
    }
}
