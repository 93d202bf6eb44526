//! Alias edges
//!
//! An alias edge is a learned bidirectional relation between two terms that
//! makes one a useful query expansion of the other. Edges are stored as a
//! canonically ordered pair, reinforced on re-observation and decayed by a
//! background task when stale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How an alias edge was discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasKind {
    /// `X (Y)` within a sentence
    Parenthetical,
    /// `X — Y` or `X - Y` with a short right side
    Dash,
    /// A heading term repeatedly referenced in the body
    HeaderContent,
    /// `team@...` address co-mentioned with a team name
    EmailTeam,
    /// High pointwise mutual information across document windows
    Cooccurrence,
    /// Extracted from user/assistant turns by the intent analyzer
    Conversational,
}

impl AliasKind {
    /// Base confidence assigned when a detector first emits this kind
    pub fn base_confidence(&self) -> f32 {
        match self {
            AliasKind::Parenthetical => 0.70,
            AliasKind::Dash => 0.55,
            AliasKind::HeaderContent => 0.60,
            AliasKind::EmailTeam => 0.65,
            // Co-occurrence carries a PMI-scaled bonus on top of this
            AliasKind::Cooccurrence => 0.35,
            AliasKind::Conversational => 0.50,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AliasKind::Parenthetical => "parenthetical",
            AliasKind::Dash => "dash",
            AliasKind::HeaderContent => "header_content",
            AliasKind::EmailTeam => "email_team",
            AliasKind::Cooccurrence => "cooccurrence",
            AliasKind::Conversational => "conversational",
        }
    }
}

impl std::str::FromStr for AliasKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "parenthetical" => Ok(AliasKind::Parenthetical),
            "dash" => Ok(AliasKind::Dash),
            "header_content" => Ok(AliasKind::HeaderContent),
            "email_team" => Ok(AliasKind::EmailTeam),
            "cooccurrence" => Ok(AliasKind::Cooccurrence),
            "conversational" => Ok(AliasKind::Conversational),
            other => Err(format!("unknown alias kind: {}", other)),
        }
    }
}

/// A learned term↔term relation with confidence and provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliasEdge {
    /// Lexicographically smaller endpoint (canonical order)
    pub term_a: String,
    /// Lexicographically larger endpoint
    pub term_b: String,
    pub kind: AliasKind,
    /// Always within `[0, 1]`
    pub confidence: f32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Times a discovery pass re-observed this edge
    pub reinforcements: u32,
    /// Documents the edge was observed in
    #[serde(default)]
    pub provenance_docs: Vec<String>,
    /// Edges below the floor are kept for audit but never used
    #[serde(default)]
    pub soft_deleted: bool,
}

impl AliasEdge {
    /// Build an edge with endpoints in canonical order
    pub fn new(term_a: &str, term_b: &str, kind: AliasKind, confidence: f32, now: DateTime<Utc>) -> Self {
        let (a, b) = canonical_pair(term_a, term_b);
        Self {
            term_a: a,
            term_b: b,
            kind,
            confidence: confidence.clamp(0.0, 1.0),
            first_seen: now,
            last_seen: now,
            reinforcements: 0,
            provenance_docs: Vec::new(),
            soft_deleted: false,
        }
    }

    /// The opposite endpoint, if `term` is one of this edge's endpoints
    pub fn other_end(&self, term: &str) -> Option<&str> {
        if self.term_a == term {
            Some(&self.term_b)
        } else if self.term_b == term {
            Some(&self.term_a)
        } else {
            None
        }
    }
}

/// Order a term pair canonically so the store holds one row per relation
pub fn canonical_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn pair_is_canonical() {
        assert_eq!(canonical_pair("sre", "stallions"), canonical_pair("stallions", "sre"));
    }

    #[test]
    fn other_end_is_bidirectional() {
        let edge = AliasEdge::new("stallions", "sre", AliasKind::Parenthetical, 0.7, Utc::now());
        assert_eq!(edge.other_end("sre"), Some("stallions"));
        assert_eq!(edge.other_end("stallions"), Some("sre"));
        assert_eq!(edge.other_end("platform"), None);
    }

    #[test]
    fn confidence_is_clamped() {
        let edge = AliasEdge::new("a b", "c d", AliasKind::Dash, 1.7, Utc::now());
        assert_eq!(edge.confidence, 1.0);
    }
}
