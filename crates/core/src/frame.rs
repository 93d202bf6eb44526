//! The answer-stream frame protocol
//!
//! A request to `answer` yields a stream of newline-delimited JSON frames.
//! Exactly one `final` frame terminates a successful stream; exactly one
//! `error` frame terminates a failed one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorCode};
use crate::quality::{Conflict, ConflictKind, ConflictSeverity};

pub const MAX_QUERY_CHARS: usize = 4000;
pub const MAX_AUTHORS_NOTE_CHARS: usize = 500;

/// Pipeline phase announced by a reasoning step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepPhase {
    Analyzing,
    Retrieving,
    Quality,
    Generating,
    Reviewing,
    Done,
}

/// One cited source as shown to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceItem {
    pub url: String,
    pub title: String,
    pub excerpt: String,
    pub authority: f32,
    pub last_modified: DateTime<Utc>,
    pub score: f32,
}

/// One conflict as shown to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictItem {
    pub topic: String,
    pub kind: ConflictKind,
    pub severity: ConflictSeverity,
    pub suggestion: String,
}

impl From<&Conflict> for ConflictItem {
    fn from(c: &Conflict) -> Self {
        Self {
            topic: c.topic.clone(),
            kind: c.kind,
            severity: c.severity,
            suggestion: c.suggestion.clone(),
        }
    }
}

/// Prompt/completion token accounting for one request
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenCounts {
    pub prompt: u32,
    pub completion: u32,
}

/// A frame on the response stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Step {
        seq: u64,
        phase: StepPhase,
        message: String,
    },
    Token {
        text: String,
    },
    Sources {
        items: Vec<SourceItem>,
        /// Set when retrieval fell back to keyword-only search
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        degraded: bool,
    },
    Conflicts {
        items: Vec<ConflictItem>,
    },
    Final {
        conversation_id: String,
        message_id: String,
        confidence: f32,
        tokens: TokenCounts,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl Frame {
    /// Whether this frame terminates the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Frame::Final { .. } | Frame::Error { .. })
    }

    /// Serialize to one newline-terminated JSON line
    pub fn to_ndjson(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| {
            // A frame failing to serialize is an invariant violation; emit
            // an error frame rather than a broken line.
            "{\"type\":\"error\",\"code\":\"InternalError\",\"message\":\"frame serialization failed\"}"
                .to_string()
        });
        line.push('\n');
        line
    }
}

/// Core entry-point request for `answer`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub user_id: String,
    /// `None` means get-or-create the user's active conversation
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub query: String,
    /// Behavioral override appended last in the system prompt
    #[serde(default)]
    pub authors_note: Option<String>,
    /// Client-generated id used for dedup coalescing
    pub request_id: String,
}

impl AnswerRequest {
    /// Validate the request and normalize the authors note.
    ///
    /// Returns a warning message when the note was truncated; the caller
    /// surfaces it as a reasoning step.
    pub fn validate(mut self) -> Result<(Self, Option<String>), Error> {
        if self.user_id.trim().is_empty() {
            return Err(Error::BadRequest("user_id is required".into()));
        }
        let query_chars = self.query.chars().count();
        if query_chars == 0 {
            return Err(Error::BadRequest("query must not be empty".into()));
        }
        if query_chars > MAX_QUERY_CHARS {
            return Err(Error::BadRequest(format!(
                "query exceeds {} characters",
                MAX_QUERY_CHARS
            )));
        }
        let mut warning = None;
        if let Some(note) = &self.authors_note {
            if note.chars().count() > MAX_AUTHORS_NOTE_CHARS {
                self.authors_note = Some(note.chars().take(MAX_AUTHORS_NOTE_CHARS).collect());
                warning = Some(format!(
                    "authors note truncated to {} characters",
                    MAX_AUTHORS_NOTE_CHARS
                ));
            }
        }
        Ok((self, warning))
    }
}
