//! Conversation truncation
//!
//! What the generator sees as conversation context: the last few
//! exchanges verbatim under a character budget, the persisted rolling
//! summary standing in for everything older, and key entities (emails,
//! names) extracted from older assistant turns instead of their raw text.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

use wiki_agent_config::ConversationSettings;
use wiki_agent_core::{Conversation, Message, MessageRole};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z][a-z]+ [A-Z][a-z]+)\b").unwrap());

/// Shapes persisted history into prompt context
pub struct HistoryShaper {
    settings: ConversationSettings,
}

impl HistoryShaper {
    pub fn new(settings: ConversationSettings) -> Self {
        Self { settings }
    }

    /// Build the context block sent to the generator.
    ///
    /// `messages` must be in chronological order and should not include
    /// the current user turn.
    pub fn shape(&self, conversation: &Conversation, messages: &[Message]) -> String {
        let verbatim_count = self.verbatim_message_count(messages);
        let split = messages.len() - verbatim_count;
        let (older, recent) = messages.split_at(split);

        let mut parts: Vec<String> = Vec::new();

        if let Some(summary) = &conversation.summary {
            if !summary.is_empty() {
                parts.push(format!("Earlier: {}", summary));
            }
        }

        // Older turns contribute extracted entities only, never raw text
        let entities = extract_entities(older);
        if !entities.is_empty() {
            parts.push(format!("Previously mentioned: {}", entities.join(", ")));
        }

        if !recent.is_empty() {
            let mut lines: Vec<String> = Vec::new();
            for message in recent {
                let speaker = match message.role {
                    MessageRole::User => "User",
                    MessageRole::Assistant => "Assistant",
                    MessageRole::System => continue,
                };
                lines.push(format!("{}: {}", speaker, message.content));
            }
            parts.push(self.trim_verbatim(lines));
        }

        parts.join("\n")
    }

    /// The last N exchanges (user + assistant pairs) stay verbatim
    fn verbatim_message_count(&self, messages: &[Message]) -> usize {
        let mut exchanges = 0;
        let mut count = 0;
        for message in messages.iter().rev() {
            count += 1;
            if message.role == MessageRole::User {
                exchanges += 1;
                if exchanges >= self.settings.keep_exchanges {
                    break;
                }
            }
        }
        count.min(messages.len())
    }

    /// Keep the most recent lines within the character budget
    fn trim_verbatim(&self, lines: Vec<String>) -> String {
        let mut kept: Vec<String> = Vec::new();
        let mut used = 0usize;
        for line in lines.into_iter().rev() {
            let len = line.chars().count() + 1;
            if used + len > self.settings.truncate_chars && !kept.is_empty() {
                break;
            }
            if len > self.settings.truncate_chars {
                // A single oversized turn gets cut rather than dropped
                let cut: String = line
                    .chars()
                    .take(self.settings.truncate_chars.saturating_sub(used + 1))
                    .collect();
                kept.push(cut);
                break;
            }
            used += len;
            kept.push(line);
        }
        kept.reverse();
        kept.join("\n")
    }

    /// Summary refresh cadence: every N exchanges
    pub fn should_refresh_summary(&self, exchange_count: u64) -> bool {
        exchange_count > 0 && exchange_count % self.settings.summary_refresh as u64 == 0
    }
}

/// Emails and title-case names from older turns
fn extract_entities(messages: &[Message]) -> Vec<String> {
    let mut entities: BTreeSet<String> = BTreeSet::new();
    for message in messages {
        for m in EMAIL_RE.find_iter(&message.content) {
            entities.insert(m.as_str().to_lowercase());
        }
        for caps in NAME_RE.captures_iter(&message.content) {
            if let Some(name) = caps.get(1) {
                entities.insert(name.as_str().to_string());
            }
        }
    }
    entities.into_iter().collect()
}
