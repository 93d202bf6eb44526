//! Learning-session repository
//!
//! One row per answered request, recorded for offline review.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::client::SqliteStore;
use crate::error::PersistenceError;

/// Summary of one answered request
#[derive(Debug, Clone)]
pub struct LearningSession {
    pub request_id: String,
    pub user_id: String,
    pub conversation_id: String,
    pub query: String,
    pub intent_type: String,
    pub retrieved_count: u32,
    pub conflict_count: u32,
    pub confidence: f32,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl SqliteStore {
    pub async fn record_learning_session(
        &self,
        session: &LearningSession,
        now: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO learning_sessions
                (id, request_id, user_id, conversation_id, query, intent_type,
                 retrieved_count, conflict_count, confidence, prompt_tokens,
                 completion_tokens, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&session.request_id)
        .bind(&session.user_id)
        .bind(&session.conversation_id)
        .bind(&session.query)
        .bind(&session.intent_type)
        .bind(session.retrieved_count as i64)
        .bind(session.conflict_count as i64)
        .bind(session.confidence as f64)
        .bind(session.prompt_tokens as i64)
        .bind(session.completion_tokens as i64)
        .bind(now.to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
