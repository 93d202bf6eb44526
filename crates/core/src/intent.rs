//! Intent plans
//!
//! The structured output of the cheap analyzer model. The orchestrator
//! trusts the plan as-is; there are no keyword overrides layered on top.

use serde::{Deserialize, Serialize};

/// What the user is asking for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    Greeting,
    TeamInquiry,
    Procedure,
    Diagnostic,
    CodeRequest,
    Explanation,
    Followup,
    #[default]
    Other,
}

/// Broad register of the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConversationType {
    Casual,
    #[default]
    Informational,
    Task,
}

/// Preferred shape of the answer body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Prose,
    Steps,
    List,
    Code,
}

/// How much detail the answer should carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseDepth {
    Brief,
    #[default]
    Normal,
    Detailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResponseStyle {
    pub format: ResponseFormat,
    pub depth: ResponseDepth,
}

/// Entities the analyzer spotted in the query or recent history
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MentionedEntities {
    #[serde(default)]
    pub people: Vec<String>,
    #[serde(default)]
    pub teams: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
}

/// Structured plan guiding retrieval and response shape.
///
/// Parsed from the analyzer model's bounded JSON output; when parsing
/// fails the caller falls back to [`IntentPlan::default_on_failure`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentPlan {
    pub intent_type: IntentType,
    #[serde(default)]
    pub conversation_type: ConversationType,
    pub needs_retrieval: bool,
    /// Up to five short search phrases
    #[serde(default)]
    pub search_focus: Vec<String>,
    #[serde(default)]
    pub response_style: ResponseStyle,
    #[serde(default)]
    pub mentioned_entities: MentionedEntities,
    /// Up to three open questions carried across turns
    #[serde(default)]
    pub unresolved_questions: Vec<String>,
    /// Narrative standing in for older history, at most 400 chars
    #[serde(default)]
    pub context_summary: String,
}

/// Hard caps on analyzer output lists
pub const MAX_SEARCH_FOCUS: usize = 5;
pub const MAX_UNRESOLVED_QUESTIONS: usize = 3;
pub const MAX_CONTEXT_SUMMARY_CHARS: usize = 400;

impl IntentPlan {
    /// Fallback plan when the analyzer call fails or its output cannot be
    /// parsed: retrieve anyway and classify as `other`.
    pub fn default_on_failure() -> Self {
        Self {
            intent_type: IntentType::Other,
            conversation_type: ConversationType::Informational,
            needs_retrieval: true,
            search_focus: Vec::new(),
            response_style: ResponseStyle::default(),
            mentioned_entities: MentionedEntities::default(),
            unresolved_questions: Vec::new(),
            context_summary: String::new(),
        }
    }

    /// Clamp list lengths and the summary to their caps
    pub fn clamp_limits(mut self) -> Self {
        self.search_focus.truncate(MAX_SEARCH_FOCUS);
        self.unresolved_questions.truncate(MAX_UNRESOLVED_QUESTIONS);
        if self.context_summary.chars().count() > MAX_CONTEXT_SUMMARY_CHARS {
            self.context_summary = self
                .context_summary
                .chars()
                .take(MAX_CONTEXT_SUMMARY_CHARS)
                .collect();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_plan_retrieves() {
        let plan = IntentPlan::default_on_failure();
        assert!(plan.needs_retrieval);
        assert_eq!(plan.intent_type, IntentType::Other);
    }

    #[test]
    fn clamp_enforces_caps() {
        let plan = IntentPlan {
            search_focus: (0..10).map(|i| format!("focus {}", i)).collect(),
            unresolved_questions: (0..6).map(|i| format!("q{}", i)).collect(),
            context_summary: "x".repeat(900),
            ..IntentPlan::default_on_failure()
        }
        .clamp_limits();
        assert_eq!(plan.search_focus.len(), MAX_SEARCH_FOCUS);
        assert_eq!(plan.unresolved_questions.len(), MAX_UNRESOLVED_QUESTIONS);
        assert_eq!(plan.context_summary.len(), MAX_CONTEXT_SUMMARY_CHARS);
    }

    #[test]
    fn intent_type_uses_snake_case() {
        let json = serde_json::to_string(&IntentType::TeamInquiry).unwrap();
        assert_eq!(json, "\"team_inquiry\"");
    }
}
