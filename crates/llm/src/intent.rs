//! Intent analysis (the cheap model)
//!
//! One bounded call classifies the query, decides whether retrieval is
//! needed and shapes the response. The orchestrator trusts the plan
//! as-is; when the call fails or its JSON cannot be parsed, the fallback
//! plan retrieves anyway and logs a warning.

use std::sync::Arc;

use wiki_agent_config::ModelSettings;
use wiki_agent_core::{ChatMessage, ChatModel, ChatRequest, IntentPlan, TokenUsage};

const SYSTEM_PROMPT: &str = "\
You classify questions for a company documentation assistant. Reply with \
one JSON object only, no prose, matching exactly:
{
  \"intent_type\": \"greeting|team_inquiry|procedure|diagnostic|code_request|explanation|followup|other\",
  \"conversation_type\": \"casual|informational|task\",
  \"needs_retrieval\": true,
  \"search_focus\": [\"up to five short search phrases\"],
  \"response_style\": {\"format\": \"prose|steps|list|code\", \"depth\": \"brief|normal|detailed\"},
  \"mentioned_entities\": {\"people\": [], \"teams\": [], \"tools\": []},
  \"unresolved_questions\": [\"up to three open questions\"],
  \"context_summary\": \"narrative of the conversation so far, 400 chars max\"
}
Set needs_retrieval false only for greetings and small talk that no \
documentation could improve.";

/// Analyzer over the cheap model instance
pub struct IntentAnalyzer {
    model: Arc<dyn ChatModel>,
    settings: ModelSettings,
}

impl IntentAnalyzer {
    pub fn new(model: Arc<dyn ChatModel>, settings: ModelSettings) -> Self {
        Self { model, settings }
    }

    /// Analyze one query against the trimmed conversation summary.
    /// Always returns a plan; failures degrade to the retrieval-on
    /// default.
    pub async fn analyze(&self, query: &str, conversation_summary: &str) -> (IntentPlan, TokenUsage) {
        let user = if conversation_summary.is_empty() {
            format!("Query: {}", query)
        } else {
            format!(
                "Conversation summary:\n{}\n\nQuery: {}",
                conversation_summary, query
            )
        };

        let request = ChatRequest {
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        match self.model.complete(request).await {
            Ok(response) => match parse_plan(&response.text) {
                Some(plan) => (plan.clamp_limits(), response.usage),
                None => {
                    tracing::warn!(
                        raw = %response.text.chars().take(200).collect::<String>(),
                        "Intent output did not parse, using default plan"
                    );
                    (IntentPlan::default_on_failure(), response.usage)
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Intent analysis failed, using default plan");
                (IntentPlan::default_on_failure(), TokenUsage::default())
            }
        }
    }
}

/// Pull the first JSON object out of the model's reply
fn parse_plan(raw: &str) -> Option<IntentPlan> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;
    use wiki_agent_core::{ChatResponse, FinishReason, IntentType, Result};

    /// Scripted model double
    struct ScriptedModel {
        replies: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<&str>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().map(String::from).collect()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse> {
            let text = self.replies.lock().pop().unwrap_or_default();
            Ok(ChatResponse {
                text,
                usage: TokenUsage {
                    prompt_tokens: 50,
                    completion_tokens: 40,
                },
                finish_reason: FinishReason::Stop,
            })
        }

        async fn complete_streaming(
            &self,
            request: ChatRequest,
            tx: mpsc::Sender<String>,
        ) -> Result<ChatResponse> {
            let response = self.complete(request).await?;
            let _ = tx.send(response.text.clone()).await;
            Ok(response)
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn analyzer(replies: Vec<&str>) -> IntentAnalyzer {
        IntentAnalyzer::new(
            Arc::new(ScriptedModel::new(replies)),
            ModelSettings {
                model: "intent-small".into(),
                temperature: 0.1,
                max_tokens: 400,
            },
        )
    }

    #[tokio::test]
    async fn well_formed_output_parses() {
        let reply = r#"{"intent_type":"team_inquiry","conversation_type":"informational",
            "needs_retrieval":true,"search_focus":["sre team members"],
            "response_style":{"format":"list","depth":"normal"},
            "mentioned_entities":{"people":[],"teams":["SRE"],"tools":[]},
            "unresolved_questions":[],"context_summary":"User asks about the SRE roster."}"#;
        let (plan, usage) = analyzer(vec![reply])
            .analyze("who is on the sre team", "")
            .await;
        assert_eq!(plan.intent_type, IntentType::TeamInquiry);
        assert!(plan.needs_retrieval);
        assert_eq!(plan.search_focus, vec!["sre team members"]);
        assert_eq!(usage.completion_tokens, 40);
    }

    #[tokio::test]
    async fn chatter_around_json_is_tolerated() {
        let reply = "Sure! Here is the classification:\n{\"intent_type\":\"greeting\",\
            \"needs_retrieval\":false,\"context_summary\":\"\"}\nHope that helps.";
        let (plan, _) = analyzer(vec![reply]).analyze("hello", "").await;
        assert_eq!(plan.intent_type, IntentType::Greeting);
        assert!(!plan.needs_retrieval);
    }

    #[tokio::test]
    async fn garbage_falls_back_to_retrieval() {
        let (plan, _) = analyzer(vec!["I cannot classify this."])
            .analyze("deploy question", "")
            .await;
        assert_eq!(plan.intent_type, IntentType::Other);
        assert!(plan.needs_retrieval);
    }

    #[tokio::test]
    async fn oversized_lists_are_clamped() {
        let focus: Vec<String> = (0..9).map(|i| format!("\"focus {}\"", i)).collect();
        let reply = format!(
            "{{\"intent_type\":\"procedure\",\"needs_retrieval\":true,\"search_focus\":[{}],\"context_summary\":\"\"}}",
            focus.join(",")
        );
        let (plan, _) = analyzer(vec![reply.as_str()]).analyze("how to deploy", "").await;
        assert_eq!(plan.search_focus.len(), 5);
    }
}
