//! Per-conversation advisory locks
//!
//! Message persistence for a conversation is serialized: one writer at a
//! time. Contention is surfaced as `ConversationBusy` so the caller can
//! retry with a fresh `get_or_create_active_conversation`.

use dashmap::DashMap;
use std::sync::Arc;

use crate::error::PersistenceError;

/// In-process advisory lock table keyed by conversation id
#[derive(Clone, Default)]
pub struct ConversationLocks {
    held: Arc<DashMap<String, ()>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the write lock for a conversation. Fails immediately
    /// when another orchestrator holds it.
    pub fn try_lock(&self, conversation_id: &str) -> Result<ConversationGuard, PersistenceError> {
        use dashmap::mapref::entry::Entry;
        match self.held.entry(conversation_id.to_string()) {
            Entry::Occupied(_) => Err(PersistenceError::ConversationBusy(
                conversation_id.to_string(),
            )),
            Entry::Vacant(entry) => {
                entry.insert(());
                Ok(ConversationGuard {
                    held: Arc::clone(&self.held),
                    conversation_id: conversation_id.to_string(),
                })
            }
        }
    }

    pub fn is_locked(&self, conversation_id: &str) -> bool {
        self.held.contains_key(conversation_id)
    }
}

/// Releases the lock on drop
pub struct ConversationGuard {
    held: Arc<DashMap<String, ()>>,
    conversation_id: String,
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        self.held.remove(&self.conversation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_writer_is_rejected() {
        let locks = ConversationLocks::new();
        let guard = locks.try_lock("c1").unwrap();
        assert!(matches!(
            locks.try_lock("c1"),
            Err(PersistenceError::ConversationBusy(_))
        ));
        // Other conversations are unaffected
        assert!(locks.try_lock("c2").is_ok());
        drop(guard);
        assert!(locks.try_lock("c1").is_ok());
    }

    #[test]
    fn guard_releases_on_drop() {
        let locks = ConversationLocks::new();
        {
            let _guard = locks.try_lock("c1").unwrap();
            assert!(locks.is_locked("c1"));
        }
        assert!(!locks.is_locked("c1"));
    }
}
