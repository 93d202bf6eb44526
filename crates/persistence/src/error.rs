//! Persistence errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conversation {0} is busy")]
    ConversationBusy(String),
}

impl From<PersistenceError> for wiki_agent_core::Error {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::ConversationBusy(id) => wiki_agent_core::Error::ConversationBusy(id),
            PersistenceError::NotFound(what) => {
                wiki_agent_core::Error::BadRequest(format!("not found: {}", what))
            }
            other => wiki_agent_core::Error::Storage(other.to_string()),
        }
    }
}
