//! Alias registry read view
//!
//! Holds expansion-eligible edges in memory, keyed by endpoint. Rebuilt
//! from the database at startup and after every discovery or decay pass;
//! readers never take the write path.

use parking_lot::RwLock;
use std::collections::HashMap;

use wiki_agent_core::text::{content_words, noun_phrases};
use wiki_agent_core::AliasEdge;
use wiki_agent_persistence::SqliteStore;

use crate::RagError;

/// In-memory view of expansion-eligible alias edges
pub struct AliasRegistry {
    /// term -> [(other endpoint, confidence)]
    by_term: RwLock<HashMap<String, Vec<(String, f32)>>>,
    expansion_cap: usize,
}

impl AliasRegistry {
    pub fn new(expansion_cap: usize) -> Self {
        Self {
            by_term: RwLock::new(HashMap::new()),
            expansion_cap,
        }
    }

    /// Rebuild the view from expansion-eligible edges in the store
    pub async fn reload(&self, store: &SqliteStore, min_confidence: f32) -> Result<(), RagError> {
        let edges = store.expansion_edges(min_confidence).await?;
        self.load_edges(&edges);
        tracing::debug!(edges = edges.len(), "Alias registry reloaded");
        Ok(())
    }

    /// Replace the view with the given edges
    pub fn load_edges(&self, edges: &[AliasEdge]) {
        let mut map: HashMap<String, Vec<(String, f32)>> = HashMap::new();
        for edge in edges {
            if edge.soft_deleted {
                continue;
            }
            map.entry(edge.term_a.clone())
                .or_default()
                .push((edge.term_b.clone(), edge.confidence));
            map.entry(edge.term_b.clone())
                .or_default()
                .push((edge.term_a.clone(), edge.confidence));
        }
        *self.by_term.write() = map;
    }

    pub fn edge_count(&self) -> usize {
        self.by_term.read().values().map(Vec::len).sum::<usize>() / 2
    }

    /// Expansions for a query: the highest-confidence terms linked to any
    /// noun phrase in the query, capped, skipping terms the query already
    /// contains (case-insensitive).
    pub fn expansions(&self, query: &str) -> Vec<String> {
        let query_lower = query.to_lowercase();
        let map = self.by_term.read();

        let mut candidates: Vec<(String, f32)> = Vec::new();
        for phrase in noun_phrases(query) {
            if let Some(linked) = map.get(&phrase) {
                for (term, confidence) in linked {
                    if query_lower.contains(term.as_str()) {
                        continue;
                    }
                    candidates.push((term.clone(), *confidence));
                }
            }
        }

        // Highest confidence first, stable on term for determinism
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        let mut expansions = Vec::new();
        for (term, _) in candidates {
            if !expansions.contains(&term) {
                expansions.push(term);
            }
            if expansions.len() >= self.expansion_cap {
                break;
            }
        }
        expansions
    }

    /// Alias terms that appear in a chunk's text, used to tag vector
    /// payloads at ingest time.
    pub fn tags_for_text(&self, text: &str) -> Vec<String> {
        let map = self.by_term.read();
        if map.is_empty() {
            return Vec::new();
        }
        let words = content_words(text);
        let text_joined = words.join(" ");
        let mut tags: Vec<String> = map
            .keys()
            .filter(|term| {
                if term.contains(' ') {
                    text_joined.contains(term.as_str())
                } else {
                    words.iter().any(|w| w == *term)
                }
            })
            .cloned()
            .collect();
        tags.sort();
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiki_agent_core::AliasKind;

    fn edge(a: &str, b: &str, confidence: f32) -> AliasEdge {
        AliasEdge::new(a, b, AliasKind::Parenthetical, confidence, Utc::now())
    }

    fn registry_with(edges: &[AliasEdge]) -> AliasRegistry {
        let registry = AliasRegistry::new(5);
        registry.load_edges(edges);
        registry
    }

    #[test]
    fn expansion_follows_highest_confidence() {
        let registry = registry_with(&[
            edge("stallions", "sre", 0.9),
            edge("stallions", "platform team", 0.4),
        ]);
        let expansions = registry.expansions("Who manages Stallions?");
        assert_eq!(expansions[0], "sre");
        assert!(expansions.contains(&"platform team".to_string()));
    }

    #[test]
    fn expansion_skips_terms_already_present() {
        let registry = registry_with(&[edge("stallions", "sre", 0.9)]);
        let expansions = registry.expansions("Is SRE the same as stallions?");
        assert!(expansions.is_empty());
    }

    #[test]
    fn expansion_respects_cap() {
        let edges: Vec<AliasEdge> = (0..10)
            .map(|i| edge("gateway", &format!("service {}", i), 0.5 + i as f32 / 100.0))
            .collect();
        let registry = registry_with(&edges);
        assert_eq!(registry.expansions("the payment gateway").len(), 5);
    }

    #[test]
    fn soft_deleted_edges_are_invisible() {
        let mut e = edge("stallions", "sre", 0.9);
        e.soft_deleted = true;
        let registry = registry_with(&[e]);
        assert!(registry.expansions("stallions oncall").is_empty());
    }

    #[test]
    fn tags_match_single_words_and_phrases() {
        let registry = registry_with(&[
            edge("sre", "stallions", 0.9),
            edge("payment gateway", "pg service", 0.8),
        ]);
        let tags = registry.tags_for_text("The SRE group owns the payment gateway rollout");
        assert!(tags.contains(&"sre".to_string()));
        assert!(tags.contains(&"payment gateway".to_string()));
        assert!(!tags.contains(&"stallions".to_string()));
    }
}
