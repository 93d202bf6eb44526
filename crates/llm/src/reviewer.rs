//! Single-pass response review
//!
//! After the generator finishes, the cheap model may look at the answer
//! once. Revision is requested only when the response claims to have no
//! information while the top chunks plainly overlap the query, or when it
//! contradicts a cited source. At most one revision per request; the
//! orchestrator enforces the cap.

use std::sync::Arc;

use wiki_agent_config::ModelSettings;
use wiki_agent_core::text::content_words;
use wiki_agent_core::{ChatMessage, ChatModel, ChatRequest};

/// Phrases that signal the generator claimed to know nothing
const NO_INFO_MARKERS: &[&str] = &[
    "i don't have information",
    "i do not have information",
    "no information about",
    "couldn't find any information",
    "could not find any information",
    "no documentation about",
];

/// Fraction of query terms the top chunk must cover for the no-info
/// heuristic to fire
const OVERLAP_THRESHOLD: f32 = 0.5;

/// Review decision
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ReviewVerdict {
    pub needs_revision: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ReviewVerdict {
    fn accept() -> Self {
        Self {
            needs_revision: false,
            reason: None,
        }
    }
}

/// Reviews generated answers against the retrieved chunks
pub struct Reviewer {
    model: Arc<dyn ChatModel>,
    settings: ModelSettings,
}

impl Reviewer {
    pub fn new(model: Arc<dyn ChatModel>, settings: ModelSettings) -> Self {
        Self { model, settings }
    }

    /// Decide whether the response needs one revision pass.
    ///
    /// The no-information case is a plain string check; the contradiction
    /// case asks the cheap model. Errors and unparseable output accept
    /// the response as-is.
    pub async fn review(
        &self,
        query: &str,
        chunk_texts: &[String],
        response: &str,
    ) -> ReviewVerdict {
        if chunk_texts.is_empty() {
            // Nothing retrieved: a no-info answer is the right answer
            return ReviewVerdict::accept();
        }

        if let Some(verdict) = self.check_no_info_claim(query, chunk_texts, response) {
            return verdict;
        }

        self.check_contradiction(query, chunk_texts, response).await
    }

    /// (a) response says "no information" while the top chunk overlaps
    /// the query terms
    fn check_no_info_claim(
        &self,
        query: &str,
        chunk_texts: &[String],
        response: &str,
    ) -> Option<ReviewVerdict> {
        let response_lower = response.to_lowercase();
        if !NO_INFO_MARKERS.iter().any(|m| response_lower.contains(m)) {
            return None;
        }

        let query_terms = content_words(query);
        if query_terms.is_empty() {
            return None;
        }
        let top = chunk_texts.first()?;
        let top_words = content_words(top);
        let covered = query_terms
            .iter()
            .filter(|t| top_words.contains(t))
            .count();
        let overlap = covered as f32 / query_terms.len() as f32;

        if overlap >= OVERLAP_THRESHOLD {
            Some(ReviewVerdict {
                needs_revision: true,
                reason: Some(format!(
                    "response claims no information but the top source covers {:.0}% of the query terms",
                    overlap * 100.0
                )),
            })
        } else {
            None
        }
    }

    /// (b) response contradicts an explicitly cited source
    async fn check_contradiction(
        &self,
        query: &str,
        chunk_texts: &[String],
        response: &str,
    ) -> ReviewVerdict {
        let context: String = chunk_texts
            .iter()
            .take(3)
            .enumerate()
            .map(|(i, text)| format!("Source {}:\n{}", i + 1, text))
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = format!(
            "Question: {}\n\n{}\n\nDraft answer:\n{}\n\nDoes the draft contradict any cited \
             source? Reply with JSON only: {{\"needs_revision\": bool, \"reason\": string}}. \
             needs_revision is true only for a direct contradiction of a source.",
            query, context, response
        );

        let request = ChatRequest {
            messages: vec![ChatMessage::user(prompt)],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        match self.model.complete(request).await {
            Ok(reply) => parse_verdict(&reply.text).unwrap_or_else(ReviewVerdict::accept),
            Err(e) => {
                tracing::warn!(error = %e, "Review call failed, accepting response");
                ReviewVerdict::accept()
            }
        }
    }
}

fn parse_verdict(raw: &str) -> Option<ReviewVerdict> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    serde_json::from_str(&raw[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use wiki_agent_core::{ChatResponse, FinishReason, Result, TokenUsage};

    struct FixedModel {
        reply: String,
    }

    #[async_trait]
    impl ChatModel for FixedModel {
        async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse> {
            Ok(ChatResponse {
                text: self.reply.clone(),
                usage: TokenUsage::default(),
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
            "fixed"
        }
    }

    fn reviewer(reply: &str) -> Reviewer {
        Reviewer::new(
            Arc::new(FixedModel {
                reply: reply.to_string(),
            }),
            ModelSettings {
                model: "intent-small".into(),
                temperature: 0.1,
                max_tokens: 400,
            },
        )
    }

    #[tokio::test]
    async fn no_info_claim_with_covering_chunk_requests_revision() {
        let r = reviewer(r#"{"needs_revision":false}"#);
        let chunks = vec![
            "The deployment process starts with a release branch and runs the standard pipeline."
                .to_string(),
        ];
        let verdict = r
            .review(
                "what is the deployment process",
                &chunks,
                "I don't have information about the deployment process.",
            )
            .await;
        assert!(verdict.needs_revision);
        assert!(verdict.reason.is_some());
    }

    #[tokio::test]
    async fn no_info_claim_without_coverage_is_accepted() {
        let r = reviewer(r#"{"needs_revision":false}"#);
        let chunks = vec!["Office lunch menu for the week.".to_string()];
        let verdict = r
            .review(
                "what is the deployment process",
                &chunks,
                "I don't have information about the deployment process.",
            )
            .await;
        assert!(!verdict.needs_revision);
    }

    #[tokio::test]
    async fn contradiction_verdict_comes_from_model() {
        let r = reviewer(r#"{"needs_revision":true,"reason":"answer contradicts source 1"}"#);
        let chunks = vec!["Deploys happen every Tuesday.".to_string()];
        let verdict = r
            .review("when do deploys happen", &chunks, "Deploys happen daily.")
            .await;
        assert!(verdict.needs_revision);
    }

    #[tokio::test]
    async fn empty_retrieval_accepts_no_info_answer() {
        let r = reviewer(r#"{"needs_revision":true,"reason":"x"}"#);
        let verdict = r
            .review("anything", &[], "I don't have information about that.")
            .await;
        assert!(!verdict.needs_revision);
    }

    #[tokio::test]
    async fn model_garbage_accepts_response() {
        let r = reviewer("not json at all");
        let chunks = vec!["Deploys happen every Tuesday.".to_string()];
        let verdict = r
            .review("when do deploys happen", &chunks, "Deploys happen on Tuesdays.")
            .await;
        assert!(!verdict.needs_revision);
    }
}
