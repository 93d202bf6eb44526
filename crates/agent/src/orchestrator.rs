//! Per-request pipeline
//!
//! The state machine behind `answer`: analyze intent concurrently with
//! history loading, retrieve when the plan calls for it, analyze quality,
//! stream the generated answer, optionally review once, persist. The
//! user's message is persisted the moment the request is accepted; the
//! assistant turn only lands on a successful final frame.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use wiki_agent_config::Settings;
use wiki_agent_core::{
    AnswerRequest, ChatMessage, ChatModel, ChatRequest, ChatResponse, Conversation, Error,
    FinishReason, Frame, IntentPlan, Message, QualityReport, Result, SourceItem, StepPhase,
    TokenCounts, TokenUsage,
};
use wiki_agent_llm::{ContextChunk, IntentAnalyzer, PromptInputs, ResponsePromptBuilder, Reviewer, TokenBucket};
use wiki_agent_persistence::{ConversationLocks, LearningSession, SqliteStore};
use wiki_agent_quality::{AnalyzedSource, QualityAnalyzer};
use wiki_agent_rag::{AliasDiscovery, RetrievalOutcome, Retriever, ScoredChunk};

use crate::dedup::DedupTable;
use crate::history::HistoryShaper;
use crate::steps::{FrameSink, FrameStream};

/// Fixed confidence for answers that never needed documentation
const CASUAL_CONFIDENCE: f32 = 0.9;
/// Ceiling when retrieval ran but found nothing
const NO_SOURCE_CONFIDENCE_CAP: f32 = 0.4;
/// History page loaded per request
const HISTORY_PAGE: usize = 24;

/// Everything the pipeline needs, shared across requests
pub struct OrchestratorDeps {
    pub store: SqliteStore,
    pub locks: ConversationLocks,
    pub retriever: Arc<Retriever>,
    pub intent: Arc<IntentAnalyzer>,
    pub generator: Arc<dyn ChatModel>,
    /// Injected; `None` disables the review pass entirely
    pub reviewer: Option<Arc<Reviewer>>,
    pub quality: Arc<QualityAnalyzer>,
    pub prompts: Arc<ResponsePromptBuilder>,
    pub rate_limiter: Arc<TokenBucket>,
    pub discovery: Arc<AliasDiscovery>,
}

enum PipelineEnd {
    Completed,
    Cancelled,
}

/// Streaming orchestrator
pub struct Orchestrator {
    deps: Arc<OrchestratorDeps>,
    settings: Arc<Settings>,
    dedup: Arc<DedupTable>,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps, settings: Settings) -> Self {
        let window = Duration::from_secs(settings.dedup.window_s);
        Self {
            deps: Arc::new(deps),
            settings: Arc::new(settings),
            dedup: Arc::new(DedupTable::new(window)),
        }
    }

    /// Core entry point: validate, coalesce, and launch the pipeline.
    /// Returns the frame stream the caller forwards to the client.
    pub async fn answer(&self, request: AnswerRequest) -> Result<FrameStream> {
        let (request, note_warning) = request.validate()?;

        self.dedup.sweep();
        let key = DedupTable::key(
            &request.user_id,
            request.conversation_id.as_deref(),
            &request.query,
        );
        if let Some(stream) = self.dedup.join(&key) {
            tracing::debug!(request_id = %request.request_id, "Joined in-flight execution");
            return Ok(stream);
        }

        let (sink, stream) = FrameSink::new(self.settings.dedup.buffer_steps);
        self.dedup.register(key.clone(), Arc::clone(&sink));

        let deps = Arc::clone(&self.deps);
        let settings = Arc::clone(&self.settings);
        let dedup = Arc::clone(&self.dedup);
        tokio::spawn(async move {
            let pipeline = Pipeline {
                deps,
                settings: Arc::clone(&settings),
            };
            let total = Duration::from_secs(settings.timeouts.total_s);
            match tokio::time::timeout(total, pipeline.run(&sink, &request, note_warning)).await {
                Ok(Ok(PipelineEnd::Completed)) => {}
                Ok(Ok(PipelineEnd::Cancelled)) => {
                    tracing::info!(request_id = %request.request_id, "Request cancelled by client");
                    dedup.invalidate(&key);
                }
                Ok(Err(error)) => {
                    tracing::warn!(request_id = %request.request_id, %error, "Pipeline failed");
                    sink.emit(Frame::Error {
                        code: error.code(),
                        message: error.to_string(),
                    });
                    dedup.invalidate(&key);
                }
                Err(_elapsed) => {
                    sink.emit(Frame::Error {
                        code: wiki_agent_core::ErrorCode::InternalError,
                        message: "total request time limit exceeded".to_string(),
                    });
                    dedup.invalidate(&key);
                }
            }
        });

        Ok(stream)
    }
}

/// One request's execution context
struct Pipeline {
    deps: Arc<OrchestratorDeps>,
    settings: Arc<Settings>,
}

impl Pipeline {
    async fn run(
        &self,
        sink: &FrameSink,
        request: &AnswerRequest,
        note_warning: Option<String>,
    ) -> Result<PipelineEnd> {
        let mut steps_log: Vec<String> = Vec::new();
        macro_rules! step {
            ($phase:expr, $msg:expr) => {{
                let message: String = $msg.into();
                steps_log.push(message.clone());
                if !sink.step($phase, message) {
                    return Ok(PipelineEnd::Cancelled);
                }
            }};
        }

        let conversation = self.resolve_conversation(request).await?;
        let _guard = self.deps.locks.try_lock(&conversation.id).map_err(Error::from)?;

        step!(StepPhase::Analyzing, "analyzing");
        if let Some(warning) = note_warning {
            step!(StepPhase::Analyzing, warning);
        }

        // The user's turn is persisted the moment the request is accepted
        let now = Utc::now();
        let user_message = Message::user(
            Uuid::new_v4().to_string(),
            conversation.id.clone(),
            request.query.clone(),
            now,
        );
        self.deps.store.append_message(&user_message).await.map_err(Error::from)?;
        self.deps
            .store
            .touch_conversation(&conversation.id, now)
            .await
            .map_err(Error::from)?;

        // Intent analysis runs concurrently with history loading
        let summary_for_intent = conversation.summary.clone().unwrap_or_default();
        let intent_timeout = Duration::from_secs(self.settings.timeouts.intent_s);
        let (history_result, intent_result) = tokio::join!(
            self.deps.store.recent_messages(&conversation.id, HISTORY_PAGE),
            tokio::time::timeout(
                intent_timeout,
                self.deps.intent.analyze(&request.query, &summary_for_intent)
            )
        );

        let mut history = history_result.map_err(Error::from)?;
        history.retain(|m| m.id != user_message.id);

        let (plan, intent_usage) = match intent_result {
            Ok(pair) => pair,
            Err(_) => {
                tracing::warn!("Intent analysis timed out, using default plan");
                (IntentPlan::default_on_failure(), TokenUsage::default())
            }
        };

        self.record_conversational_aliases(&plan);

        // Retrieval, gated on the plan alone
        let (outcome, report) = if plan.needs_retrieval {
            self.retrieve_and_analyze(sink, request, &plan, &mut steps_log)
                .await?
        } else {
            (RetrievalOutcome::default(), QualityReport::default())
        };

        let source_items: Vec<SourceItem> =
            outcome.chunks.iter().map(|c| c.to_source_item()).collect();
        if !sink.emit(Frame::Sources {
            items: source_items.clone(),
            degraded: outcome.degraded,
        }) {
            return Ok(PipelineEnd::Cancelled);
        }

        // Prompt assembly
        let shaper = HistoryShaper::new(self.settings.conversation.clone());
        let shaped_history = shaper.shape(&conversation, &history);
        let context_summary = match (plan.context_summary.is_empty(), shaped_history.is_empty()) {
            (false, false) => format!("{}\n{}", plan.context_summary, shaped_history),
            (false, true) => plan.context_summary.clone(),
            (true, _) => shaped_history,
        };
        let inputs = PromptInputs {
            plan: Some(plan.clone()),
            context_summary,
            chunks: outcome
                .chunks
                .iter()
                .map(|c| ContextChunk {
                    source: c.to_source_item(),
                    text: c.payload.text.clone(),
                })
                .collect(),
            conflicts: report.conflicts.clone(),
            authors_note: request.authors_note.clone(),
        };
        let system = self.deps.prompts.build_system(&inputs);
        let chat_request = ChatRequest {
            messages: vec![system, ChatMessage::user(request.query.clone())],
            temperature: self.settings.llm.main.temperature,
            max_tokens: self.settings.llm.main.max_tokens,
        };

        // Global token budget, enforced before the expensive call
        let estimate = wiki_agent_core::text::estimate_tokens(&chat_request.messages[0].content)
            as u64
            + self.settings.llm.main.max_tokens as u64;
        self.deps.rate_limiter.acquire(estimate).await?;

        step!(StepPhase::Generating, "generating");
        let first_pass = self.stream_generation(sink, chat_request.clone()).await?;
        let Some(mut response) = first_pass else {
            return Ok(PipelineEnd::Cancelled);
        };

        // Optional single review pass; at most one revision per request
        if let Some(reviewer) = &self.deps.reviewer {
            if !outcome.chunks.is_empty() {
                step!(StepPhase::Reviewing, "reviewing");
                match self
                    .review_once(reviewer, request, &outcome, &response.text)
                    .await
                {
                    Some(reason) => {
                        step!(StepPhase::Generating, "regenerating");
                        let mut revised_request = chat_request.clone();
                        revised_request
                            .messages
                            .push(ChatMessage::assistant(response.text.clone()));
                        revised_request.messages.push(ChatMessage::user(format!(
                            "Revise your answer; it was flagged: {}. Ground the revision in the \
                             provided documentation.",
                            reason
                        )));
                        match self.stream_generation(sink, revised_request).await? {
                            Some(revised) => {
                                response.usage.prompt_tokens += revised.usage.prompt_tokens;
                                response.usage.completion_tokens += revised.usage.completion_tokens;
                                if !revised.text.trim().is_empty() {
                                    response.text = revised.text;
                                }
                            }
                            None => return Ok(PipelineEnd::Cancelled),
                        }
                    }
                    None => {}
                }
            }
        }

        // Post-generation confidence
        let sources = merge_sources(&outcome.chunks);
        let confidence = if !plan.needs_retrieval {
            CASUAL_CONFIDENCE
        } else {
            let scored = self.deps.quality.confidence_after_generation(
                &request.query,
                &sources,
                &report,
                &response.text,
                None,
            );
            if outcome.chunks.is_empty() {
                scored.min(NO_SOURCE_CONFIDENCE_CAP)
            } else {
                scored
            }
        };

        let tokens = TokenCounts {
            prompt: intent_usage.prompt_tokens + response.usage.prompt_tokens,
            completion: intent_usage.completion_tokens + response.usage.completion_tokens,
        };

        let assistant_message = self
            .persist_assistant_turn(
                &conversation,
                &plan,
                &response.text,
                source_items,
                confidence,
                steps_log.clone(),
                tokens,
            )
            .await?;

        self.record_learning_session(request, &conversation, &plan, &outcome, confidence, tokens)
            .await;

        step!(StepPhase::Done, "done");
        sink.emit(Frame::Final {
            conversation_id: conversation.id.clone(),
            message_id: assistant_message,
            confidence,
            tokens,
        });
        Ok(PipelineEnd::Completed)
    }

    async fn resolve_conversation(&self, request: &AnswerRequest) -> Result<Conversation> {
        match &request.conversation_id {
            Some(id) => {
                let conversation = self
                    .deps
                    .store
                    .get_conversation(id)
                    .await
                    .map_err(Error::from)?
                    .ok_or_else(|| Error::BadRequest(format!("unknown conversation {}", id)))?;
                if conversation.user_id != request.user_id {
                    return Err(Error::Unauthorized);
                }
                Ok(conversation)
            }
            None => self
                .deps
                .store
                .get_or_create_active_conversation(&request.user_id)
                .await
                .map_err(Error::from),
        }
    }

    /// Retrieval with its timeout, then quality analysis. Timeouts fall
    /// back to keyword-only; an unreachable vector index is surfaced as a
    /// step and the request continues on conversation context alone.
    async fn retrieve_and_analyze(
        &self,
        sink: &FrameSink,
        request: &AnswerRequest,
        plan: &IntentPlan,
        steps_log: &mut Vec<String>,
    ) -> Result<(RetrievalOutcome, QualityReport)> {
        let mut step = |phase: StepPhase, message: String, steps_log: &mut Vec<String>| {
            steps_log.push(message.clone());
            sink.step(phase, message)
        };

        if !self.deps.retriever.embedder_is_warm()
            && !step(
                StepPhase::Retrieving,
                "loading embedding model".to_string(),
                steps_log,
            )
        {
            return Err(Error::Internal("client disconnected".into()));
        }
        if !step(StepPhase::Retrieving, "retrieving".to_string(), steps_log) {
            return Err(Error::Internal("client disconnected".into()));
        }

        let retrieval_timeout = Duration::from_secs(self.settings.timeouts.retrieval_s);
        let outcome = match tokio::time::timeout(
            retrieval_timeout,
            self.deps.retriever.retrieve(&request.query, Some(plan)),
        )
        .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(error)) => {
                tracing::warn!(%error, "Retrieval unavailable, continuing without documentation");
                step(
                    StepPhase::Retrieving,
                    "retrieval unavailable, answering from conversation context".to_string(),
                    steps_log,
                );
                RetrievalOutcome::default()
            }
            Err(_elapsed) => {
                step(
                    StepPhase::Retrieving,
                    "retrieval timed out, trying keyword-only search".to_string(),
                    steps_log,
                );
                self.deps
                    .retriever
                    .retrieve_keyword_only(&request.query, Some(plan))
                    .await
                    .unwrap_or_default()
            }
        };

        if !outcome.expansions.is_empty() {
            step(
                StepPhase::Retrieving,
                format!("expanded query with: {}", outcome.expansions.join(", ")),
                steps_log,
            );
        }
        step(
            StepPhase::Retrieving,
            format!("found {} sources", outcome.chunks.len()),
            steps_log,
        );

        let mut report = QualityReport::default();
        if !outcome.chunks.is_empty() {
            step(StepPhase::Quality, "analyzing quality".to_string(), steps_log);
            let sources = merge_sources(&outcome.chunks);
            report = self
                .deps
                .quality
                .analyze(&request.query, plan.intent_type, &sources, Utc::now());
            if report.has_conflicts() {
                if !sink.emit(Frame::Conflicts {
                    items: report.conflicts.iter().map(Into::into).collect(),
                }) {
                    return Err(Error::Internal("client disconnected".into()));
                }
                step(
                    StepPhase::Quality,
                    format!("{} conflicts detected", report.conflicts.len()),
                    steps_log,
                );
            }
        }

        Ok((outcome, report))
    }

    /// Forward generated tokens to the stream. `None` means the client
    /// went away; the in-flight model call is cancelled by dropping the
    /// token receiver.
    async fn stream_generation(
        &self,
        sink: &FrameSink,
        chat_request: ChatRequest,
    ) -> Result<Option<ChatResponse>> {
        let (tx, mut rx) = mpsc::channel::<String>(32);
        let generator = Arc::clone(&self.deps.generator);
        let handle =
            tokio::spawn(async move { generator.complete_streaming(chat_request, tx).await });

        let mut client_gone = false;
        while let Some(token) = rx.recv().await {
            if !sink.emit(Frame::Token { text: token }) {
                client_gone = true;
                break;
            }
        }
        drop(rx);

        let response = handle
            .await
            .map_err(|e| Error::Internal(format!("generation task failed: {}", e)))??;

        if client_gone || response.finish_reason == FinishReason::Cancelled {
            return Ok(None);
        }
        Ok(Some(response))
    }

    /// One review pass; `Some(reason)` requests the single revision
    async fn review_once(
        &self,
        reviewer: &Reviewer,
        request: &AnswerRequest,
        outcome: &RetrievalOutcome,
        response_text: &str,
    ) -> Option<String> {
        let chunk_texts: Vec<String> = outcome
            .chunks
            .iter()
            .map(|c| c.payload.text.clone())
            .collect();
        let reviewer_timeout = Duration::from_secs(self.settings.timeouts.reviewer_s);
        match tokio::time::timeout(
            reviewer_timeout,
            reviewer.review(&request.query, &chunk_texts, response_text),
        )
        .await
        {
            Ok(verdict) if verdict.needs_revision => Some(
                verdict
                    .reason
                    .unwrap_or_else(|| "response disagreed with retrieved sources".to_string()),
            ),
            Ok(_) => None,
            Err(_) => {
                tracing::warn!("Review timed out, skipping");
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_assistant_turn(
        &self,
        conversation: &Conversation,
        plan: &IntentPlan,
        text: &str,
        sources: Vec<SourceItem>,
        confidence: f32,
        thinking_steps: Vec<String>,
        tokens: TokenCounts,
    ) -> Result<String> {
        let now = Utc::now();
        let mut message = Message::assistant(
            Uuid::new_v4().to_string(),
            conversation.id.clone(),
            text.to_string(),
            now,
        );
        message.sources = sources;
        message.confidence = Some(confidence);
        message.thinking_steps = thinking_steps;
        message.token_counts = Some(tokens);
        self.deps.store.append_message(&message).await.map_err(Error::from)?;
        self.deps
            .store
            .touch_conversation(&conversation.id, now)
            .await
            .map_err(Error::from)?;

        // Refresh the rolling summary on its cadence
        let shaper = HistoryShaper::new(self.settings.conversation.clone());
        let exchanges = self
            .deps
            .store
            .exchange_count(&conversation.id)
            .await
            .map_err(Error::from)?;
        if shaper.should_refresh_summary(exchanges) && !plan.context_summary.is_empty() {
            self.deps
                .store
                .update_conversation_summary(&conversation.id, &plan.context_summary)
                .await
                .map_err(Error::from)?;
        }

        Ok(message.id)
    }

    async fn record_learning_session(
        &self,
        request: &AnswerRequest,
        conversation: &Conversation,
        plan: &IntentPlan,
        outcome: &RetrievalOutcome,
        confidence: f32,
        tokens: TokenCounts,
    ) {
        let session = LearningSession {
            request_id: request.request_id.clone(),
            user_id: request.user_id.clone(),
            conversation_id: conversation.id.clone(),
            query: request.query.clone(),
            intent_type: format!("{:?}", plan.intent_type).to_lowercase(),
            retrieved_count: outcome.chunks.len() as u32,
            conflict_count: 0,
            confidence,
            prompt_tokens: tokens.prompt,
            completion_tokens: tokens.completion,
        };
        if let Err(error) = self
            .deps
            .store
            .record_learning_session(&session, Utc::now())
            .await
        {
            tracing::warn!(%error, "Failed to record learning session");
        }
    }

    /// Conversational alias edges never block the request path
    fn record_conversational_aliases(&self, plan: &IntentPlan) {
        let pairs = AliasDiscovery::conversational_pairs(plan);
        if pairs.is_empty() {
            return;
        }
        let discovery = Arc::clone(&self.deps.discovery);
        let store = self.deps.store.clone();
        tokio::spawn(async move {
            for (a, b) in pairs {
                if let Err(error) = discovery.observe_conversational(&store, &a, &b).await {
                    tracing::debug!(%error, "Conversational alias not recorded");
                }
            }
        });
    }
}

/// Group scored chunks by document for the quality analyzer
fn merge_sources(chunks: &[ScoredChunk]) -> Vec<AnalyzedSource> {
    let mut by_document: HashMap<&str, AnalyzedSource> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();
    for chunk in chunks {
        match by_document.get_mut(chunk.document_id.as_str()) {
            Some(source) => {
                source.text.push_str("\n");
                source.text.push_str(&chunk.payload.text);
            }
            None => {
                order.push(chunk.document_id.as_str());
                by_document.insert(
                    chunk.document_id.as_str(),
                    AnalyzedSource {
                        url: chunk.payload.source_url.clone(),
                        title: chunk.payload.title.clone(),
                        text: chunk.payload.text.clone(),
                        authority: chunk.authority,
                        last_modified: chunk.payload.last_modified,
                    },
                );
            }
        }
    }
    order
        .into_iter()
        .filter_map(|id| by_document.remove(id))
        .collect()
}
