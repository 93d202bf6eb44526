//! Conflicts and quality reports

use serde::{Deserialize, Serialize};

/// Kind of inconsistency detected between retrieved sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    MissingInfo,
    Contradictory,
    Outdated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    Low,
    Med,
    High,
}

impl ConflictSeverity {
    /// Penalty weight used by the confidence calculation
    pub fn penalty_weight(&self) -> f32 {
        match self {
            ConflictSeverity::High => 0.3,
            ConflictSeverity::Med => 0.15,
            ConflictSeverity::Low => 0.05,
        }
    }
}

/// A detected inconsistency between two or more sources on one topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub topic: String,
    /// URLs of the sources involved
    pub sources: Vec<String>,
    pub kind: ConflictKind,
    pub severity: ConflictSeverity,
    /// What the responder should do about it
    pub suggestion: String,
}

/// Output of the quality analyzer for one retrieval set
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QualityReport {
    /// Overall confidence in `[0, 1]`
    pub confidence: f32,
    pub conflicts: Vec<Conflict>,
    pub notes: Vec<String>,
}

impl QualityReport {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_weights_are_ordered() {
        assert!(ConflictSeverity::High.penalty_weight() > ConflictSeverity::Med.penalty_weight());
        assert!(ConflictSeverity::Med.penalty_weight() > ConflictSeverity::Low.penalty_weight());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ConflictKind::MissingInfo).unwrap();
        assert_eq!(json, "\"missing_info\"");
    }
}
