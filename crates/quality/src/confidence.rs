//! Confidence scoring
//!
//! Weighted sum over six factors, clamped to [0, 1]. Before generation
//! only the first four factors exist, so the score is prorated over their
//! weights; after generation the completeness and self-certainty factors
//! join at full weight.

use wiki_agent_core::text::content_words;
use wiki_agent_core::Conflict;

use crate::AnalyzedSource;

/// Factor weights
const W_COVERAGE: f32 = 0.30;
const W_AUTHORITY: f32 = 0.20;
const W_CONFLICT: f32 = 0.15;
const W_COMPLEXITY: f32 = 0.10;
const W_COMPLETENESS: f32 = 0.15;
const W_CERTAINTY: f32 = 0.10;

/// Sources considered by coverage and authority
const TOP_SOURCES: usize = 5;
/// Neutral self-certainty when the model was not asked
const DEFAULT_CERTAINTY: f32 = 0.5;
/// Answers carrying a medium-or-worse conflict never report more than this
const CONFLICT_CONFIDENCE_CAP: f32 = 0.75;

/// Individual factor values, exposed for inspection and tests
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceFactors {
    pub documentation_coverage: f32,
    pub source_authority: f32,
    pub conflict_penalty: f32,
    pub query_complexity: f32,
    pub response_completeness: Option<f32>,
    pub ai_certainty: Option<f32>,
}

/// Computes pre- and post-generation confidence
pub struct ConfidenceScorer;

impl ConfidenceScorer {
    pub fn new() -> Self {
        Self
    }

    /// Confidence before the answer exists, prorated over the first four
    /// factor weights.
    pub fn pre_generation(
        &self,
        query: &str,
        sources: &[AnalyzedSource],
        conflicts: &[Conflict],
    ) -> f32 {
        let factors = self.base_factors(query, sources, conflicts);
        let weighted = W_COVERAGE * factors.documentation_coverage
            + W_AUTHORITY * factors.source_authority
            + W_CONFLICT * factors.conflict_penalty
            + W_COMPLEXITY * factors.query_complexity;
        let weight_sum = W_COVERAGE + W_AUTHORITY + W_CONFLICT + W_COMPLEXITY;
        apply_conflict_cap((weighted / weight_sum).clamp(0.0, 1.0), conflicts)
    }

    /// Confidence over all six factors
    pub fn post_generation(
        &self,
        query: &str,
        sources: &[AnalyzedSource],
        conflicts: &[Conflict],
        response: &str,
        ai_certainty: Option<f32>,
    ) -> f32 {
        let mut factors = self.base_factors(query, sources, conflicts);
        factors.response_completeness = Some(response_completeness(query, response));
        factors.ai_certainty = Some(ai_certainty.unwrap_or(DEFAULT_CERTAINTY).clamp(0.0, 1.0));

        let weighted = W_COVERAGE * factors.documentation_coverage
            + W_AUTHORITY * factors.source_authority
            + W_CONFLICT * factors.conflict_penalty
            + W_COMPLEXITY * factors.query_complexity
            + W_COMPLETENESS * factors.response_completeness.unwrap_or(0.0)
            + W_CERTAINTY * factors.ai_certainty.unwrap_or(0.0);
        apply_conflict_cap(weighted.clamp(0.0, 1.0), conflicts)
    }

    fn base_factors(
        &self,
        query: &str,
        sources: &[AnalyzedSource],
        conflicts: &[Conflict],
    ) -> ConfidenceFactors {
        ConfidenceFactors {
            documentation_coverage: documentation_coverage(query, sources),
            source_authority: source_authority(sources),
            conflict_penalty: conflict_penalty(conflicts),
            query_complexity: query_complexity(query),
            response_completeness: None,
            ai_certainty: None,
        }
    }
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::new()
    }
}

/// Fraction of query terms covered by the top sources
fn documentation_coverage(query: &str, sources: &[AnalyzedSource]) -> f32 {
    let terms = content_words(query);
    if terms.is_empty() || sources.is_empty() {
        return 0.0;
    }
    let mut corpus: Vec<String> = Vec::new();
    for source in sources.iter().take(TOP_SOURCES) {
        corpus.extend(content_words(&source.text));
    }
    let covered = terms.iter().filter(|t| corpus.contains(t)).count();
    covered as f32 / terms.len() as f32
}

/// Mean authority of the top sources
fn source_authority(sources: &[AnalyzedSource]) -> f32 {
    let top: Vec<f32> = sources
        .iter()
        .take(TOP_SOURCES)
        .map(|s| s.authority)
        .collect();
    if top.is_empty() {
        return 0.0;
    }
    top.iter().sum::<f32>() / top.len() as f32
}

/// One minus the mean severity weight of detected conflicts
fn conflict_penalty(conflicts: &[Conflict]) -> f32 {
    if conflicts.is_empty() {
        return 1.0;
    }
    let total: f32 = conflicts.iter().map(|c| c.severity.penalty_weight()).sum();
    (1.0 - total / conflicts.len() as f32).clamp(0.0, 1.0)
}

/// Unresolved medium-or-worse conflicts cap the reported confidence
fn apply_conflict_cap(score: f32, conflicts: &[Conflict]) -> f32 {
    use wiki_agent_core::ConflictSeverity;
    if conflicts
        .iter()
        .any(|c| c.severity >= ConflictSeverity::Med)
    {
        score.min(CONFLICT_CONFIDENCE_CAP)
    } else {
        score
    }
}

/// Short queries are easier to answer well
fn query_complexity(query: &str) -> f32 {
    let tokens = content_words(query).len() as f32;
    (10.0 / (10.0 + tokens)).clamp(0.0, 1.0)
}

/// Did the answer engage with the query terms at a plausible length
fn response_completeness(query: &str, response: &str) -> f32 {
    let terms = content_words(query);
    let response_words = content_words(response);
    if response_words.is_empty() {
        return 0.0;
    }
    let engagement = if terms.is_empty() {
        1.0
    } else {
        terms.iter().filter(|t| response_words.contains(t)).count() as f32 / terms.len() as f32
    };
    // Very short answers cap out low regardless of term overlap
    let length_factor = (response_words.len() as f32 / 30.0).clamp(0.2, 1.0);
    engagement * 0.7 + length_factor * 0.3
}
