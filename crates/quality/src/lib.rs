//! Information quality analysis
//!
//! Post-processes the retrieved set: detects cross-source conflicts
//! (stale rosters, contradictions, one-sided coverage) and produces the
//! confidence score attached to every answer.

mod confidence;
mod conflict;

pub use confidence::{ConfidenceFactors, ConfidenceScorer};
pub use conflict::{extract_roster, is_team_inquiry, ConflictDetector, Roster};

use chrono::{DateTime, Utc};

use wiki_agent_core::{IntentType, QualityReport};

/// One retrieved source as the analyzer sees it. Chunks from the same
/// document are merged into a single view before analysis.
#[derive(Debug, Clone)]
pub struct AnalyzedSource {
    pub url: String,
    pub title: String,
    pub text: String,
    pub authority: f32,
    pub last_modified: DateTime<Utc>,
}

/// Quality analyzer combining conflict detection and confidence scoring
pub struct QualityAnalyzer {
    detector: ConflictDetector,
    scorer: ConfidenceScorer,
}

impl QualityAnalyzer {
    pub fn new() -> Self {
        Self {
            detector: ConflictDetector::new(),
            scorer: ConfidenceScorer::new(),
        }
    }

    /// Pre-generation analysis: conflicts plus the prorated confidence
    /// over the factors known before the answer exists.
    pub fn analyze(
        &self,
        query: &str,
        intent_type: IntentType,
        sources: &[AnalyzedSource],
        now: DateTime<Utc>,
    ) -> QualityReport {
        let conflicts = self.detector.detect(query, intent_type, sources, now);
        let confidence = self
            .scorer
            .pre_generation(query, sources, &conflicts);

        let mut notes = Vec::new();
        if sources.is_empty() {
            notes.push("no sources retrieved".to_string());
        }
        for conflict in &conflicts {
            notes.push(format!("{}: {}", conflict.topic, conflict.suggestion));
        }

        QualityReport {
            confidence,
            conflicts,
            notes,
        }
    }

    /// Post-generation confidence including response completeness and the
    /// model's self-reported certainty (neutral when absent).
    pub fn confidence_after_generation(
        &self,
        query: &str,
        sources: &[AnalyzedSource],
        report: &QualityReport,
        response: &str,
        ai_certainty: Option<f32>,
    ) -> f32 {
        self.scorer
            .post_generation(query, sources, &report.conflicts, response, ai_certainty)
    }
}

impl Default for QualityAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
