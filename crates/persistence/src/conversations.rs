//! Conversation and message repository
//!
//! Messages are append-only and ordered by `(created_at, id)`. At most one
//! conversation per user is active, enforced by a partial unique index.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use wiki_agent_core::{Conversation, Message, MessageRole, TokenCounts};

use crate::client::SqliteStore;
use crate::documents::parse_timestamp;
use crate::error::PersistenceError;

impl SqliteStore {
    /// Fetch the user's active conversation, creating one if none exists
    pub async fn get_or_create_active_conversation(
        &self,
        user_id: &str,
    ) -> Result<Conversation, PersistenceError> {
        if let Some(row) =
            sqlx::query("SELECT * FROM conversations WHERE user_id = ? AND active = 1")
                .bind(user_id)
                .fetch_optional(self.pool())
                .await?
        {
            return conversation_from_row(row);
        }

        let conversation = Conversation::new(Uuid::new_v4().to_string(), user_id.to_string(), Utc::now());
        sqlx::query(
            r#"
            INSERT INTO conversations (id, user_id, mode, created_at, last_activity, active, summary)
            VALUES (?, ?, ?, ?, ?, 1, NULL)
            "#,
        )
        .bind(&conversation.id)
        .bind(&conversation.user_id)
        .bind(&conversation.mode)
        .bind(conversation.created_at.to_rfc3339())
        .bind(conversation.last_activity.to_rfc3339())
        .execute(self.pool())
        .await?;

        tracing::debug!(conversation_id = %conversation.id, user_id, "Created conversation");
        Ok(conversation)
    }

    pub async fn get_conversation(
        &self,
        id: &str,
    ) -> Result<Option<Conversation>, PersistenceError> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(conversation_from_row).transpose()
    }

    /// "New chat": flips `active` off, never deletes
    pub async fn close_conversation(&self, id: &str) -> Result<(), PersistenceError> {
        let result = sqlx::query("UPDATE conversations SET active = 0 WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(PersistenceError::NotFound(format!("conversation {}", id)));
        }
        Ok(())
    }

    /// Deactivate conversations idle since before `cutoff`. Returns how
    /// many were flipped.
    pub async fn close_idle_conversations(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, PersistenceError> {
        let result =
            sqlx::query("UPDATE conversations SET active = 0 WHERE active = 1 AND last_activity < ?")
                .bind(cutoff.to_rfc3339())
                .execute(self.pool())
                .await?;
        Ok(result.rows_affected())
    }

    pub async fn touch_conversation(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        sqlx::query("UPDATE conversations SET last_activity = ? WHERE id = ?")
            .bind(now.to_rfc3339())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Persist the rolling context summary for a conversation
    pub async fn update_conversation_summary(
        &self,
        id: &str,
        summary: &str,
    ) -> Result<(), PersistenceError> {
        sqlx::query("UPDATE conversations SET summary = ? WHERE id = ?")
            .bind(summary)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn append_message(&self, message: &Message) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, role, content, created_at, sources,
                                  confidence, thinking_steps, prompt_tokens, completion_tokens)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at.to_rfc3339())
        .bind(serde_json::to_string(&message.sources)?)
        .bind(message.confidence.map(|c| c as f64))
        .bind(serde_json::to_string(&message.thinking_steps)?)
        .bind(message.token_counts.map(|t| t.prompt as i64))
        .bind(message.token_counts.map(|t| t.completion as i64))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// All messages in a conversation, oldest first
    pub async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE conversation_id = ? ORDER BY created_at, id",
        )
        .bind(conversation_id)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(message_from_row).collect()
    }

    /// The most recent `limit` messages, returned oldest first
    pub async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE conversation_id = ?
             ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(conversation_id)
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;
        let mut messages: Vec<Message> = rows
            .into_iter()
            .map(message_from_row)
            .collect::<Result<_, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// Number of user turns in a conversation
    pub async fn exchange_count(&self, conversation_id: &str) -> Result<u64, PersistenceError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM messages WHERE conversation_id = ? AND role = 'user'",
        )
        .bind(conversation_id)
        .fetch_one(self.pool())
        .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }
}

fn conversation_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Conversation, PersistenceError> {
    Ok(Conversation {
        id: row.get("id"),
        user_id: row.get("user_id"),
        mode: row.get("mode"),
        created_at: parse_timestamp(row.get("created_at")),
        last_activity: parse_timestamp(row.get("last_activity")),
        active: row.get::<i64, _>("active") != 0,
        summary: row.get("summary"),
    })
}

fn message_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Message, PersistenceError> {
    let role: String = row.get("role");
    let sources: String = row.get("sources");
    let thinking_steps: String = row.get("thinking_steps");
    let prompt_tokens: Option<i64> = row.get("prompt_tokens");
    let completion_tokens: Option<i64> = row.get("completion_tokens");
    Ok(Message {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        role: role.parse().unwrap_or(MessageRole::System),
        content: row.get("content"),
        created_at: parse_timestamp(row.get("created_at")),
        sources: serde_json::from_str(&sources)?,
        confidence: row.get::<Option<f64>, _>("confidence").map(|c| c as f32),
        thinking_steps: serde_json::from_str(&thinking_steps)?,
        token_counts: match (prompt_tokens, completion_tokens) {
            (Some(p), Some(c)) => Some(TokenCounts {
                prompt: p as u32,
                completion: c as u32,
            }),
            _ => None,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn one_active_conversation_per_user() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        let first = store.get_or_create_active_conversation("u1").await.unwrap();
        let second = store.get_or_create_active_conversation("u1").await.unwrap();
        assert_eq!(first.id, second.id);

        store.close_conversation(&first.id).await.unwrap();
        let third = store.get_or_create_active_conversation("u1").await.unwrap();
        assert_ne!(first.id, third.id);

        // Closed conversation still exists
        let closed = store.get_conversation(&first.id).await.unwrap().unwrap();
        assert!(!closed.active);
    }

    #[tokio::test]
    async fn messages_are_ordered_and_counted() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        let conv = store.get_or_create_active_conversation("u1").await.unwrap();

        let base = Utc::now();
        for i in 0..3u32 {
            let msg = Message::user(
                format!("m{}", i),
                conv.id.clone(),
                format!("question {}", i),
                base + chrono::Duration::seconds(i as i64),
            );
            store.append_message(&msg).await.unwrap();
        }
        let reply = Message::assistant("m-a".into(), conv.id.clone(), "answer".into(), base + chrono::Duration::seconds(10));
        store.append_message(&reply).await.unwrap();

        let all = store.messages(&conv.id).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].content, "question 0");
        assert_eq!(all[3].content, "answer");

        assert_eq!(store.exchange_count(&conv.id).await.unwrap(), 3);

        let recent = store.recent_messages(&conv.id, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "question 2");
        assert_eq!(recent[1].content, "answer");
    }

    #[tokio::test]
    async fn idle_sweep_only_flips_active() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        let conv = store.get_or_create_active_conversation("u1").await.unwrap();

        let flipped = store
            .close_idle_conversations(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(flipped, 1);
        let loaded = store.get_conversation(&conv.id).await.unwrap().unwrap();
        assert!(!loaded.active);
    }
}
