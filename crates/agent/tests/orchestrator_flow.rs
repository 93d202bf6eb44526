//! End-to-end pipeline tests over in-memory backends and scripted models

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use wiki_agent_agent::{FrameStream, Orchestrator, OrchestratorDeps};
use wiki_agent_config::Settings;
use wiki_agent_core::{
    AnswerRequest, ChatModel, ChatRequest, ChatResponse, Document, ErrorCode, FinishReason, Frame,
    IndexFilter, Result as CoreResult, ScrollPage, SearchHit, SourceKind, StepPhase, TokenUsage,
    VectorIndex, VectorPoint,
};
use wiki_agent_llm::{IntentAnalyzer, ResponsePromptBuilder, Reviewer, TokenBucket};
use wiki_agent_persistence::{ConversationLocks, SqliteStore};
use wiki_agent_quality::QualityAnalyzer;
use wiki_agent_rag::{
    AliasDiscovery, AliasRegistry, ChunkerConfig, DeterministicEmbedder, IngestPipeline,
    InMemoryVectorIndex, KeywordIndex, Retriever, RetrieverConfig, SectionChunker,
};

/// Chat model replaying scripted replies; streaming sends word tokens
struct ScriptedModel {
    replies: Mutex<Vec<String>>,
    token_delay: Duration,
}

impl ScriptedModel {
    fn new(replies: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().rev().map(String::from).collect()),
            token_delay: Duration::from_millis(0),
        })
    }

    fn slow(replies: Vec<&str>, token_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().rev().map(String::from).collect()),
            token_delay,
        })
    }

    fn next_reply(&self) -> String {
        self.replies.lock().pop().unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, _request: ChatRequest) -> CoreResult<ChatResponse> {
        Ok(ChatResponse {
            text: self.next_reply(),
            usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 50,
            },
            finish_reason: FinishReason::Stop,
        })
    }

    async fn complete_streaming(
        &self,
        _request: ChatRequest,
        tx: mpsc::Sender<String>,
    ) -> CoreResult<ChatResponse> {
        let reply = self.next_reply();
        let mut sent = String::new();
        for word in reply.split_inclusive(' ') {
            if !self.token_delay.is_zero() {
                tokio::time::sleep(self.token_delay).await;
            }
            if tx.send(word.to_string()).await.is_err() {
                return Ok(ChatResponse {
                    text: sent,
                    usage: TokenUsage::default(),
                    finish_reason: FinishReason::Cancelled,
                });
            }
            sent.push_str(word);
        }
        Ok(ChatResponse {
            text: sent,
            usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 50,
            },
            finish_reason: FinishReason::Stop,
        })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Counts vector searches so tests can assert none were issued
struct CountingIndex {
    inner: InMemoryVectorIndex,
    searches: AtomicUsize,
}

impl CountingIndex {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryVectorIndex::new(),
            searches: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl VectorIndex for CountingIndex {
    async fn upsert(&self, points: Vec<VectorPoint>) -> CoreResult<()> {
        self.inner.upsert(points).await
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<IndexFilter>,
    ) -> CoreResult<Vec<SearchHit>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.inner.search(vector, k, filter).await
    }

    async fn scroll(
        &self,
        filter: Option<IndexFilter>,
        cursor: Option<String>,
    ) -> CoreResult<ScrollPage> {
        self.inner.scroll(filter, cursor).await
    }

    async fn delete_by_document(&self, document_id: &str) -> CoreResult<()> {
        self.inner.delete_by_document(document_id).await
    }
}

struct Harness {
    orchestrator: Orchestrator,
    store: SqliteStore,
    ingest: IngestPipeline,
    vector_index: Arc<CountingIndex>,
}

const INTENT_GREETING: &str = r#"{"intent_type":"greeting","conversation_type":"casual",
    "needs_retrieval":false,"search_focus":[],
    "response_style":{"format":"prose","depth":"brief"},
    "mentioned_entities":{"people":[],"teams":[],"tools":[]},
    "unresolved_questions":[],"context_summary":""}"#;

const INTENT_TEAM: &str = r#"{"intent_type":"team_inquiry","conversation_type":"informational",
    "needs_retrieval":true,"search_focus":["sre team members"],
    "response_style":{"format":"list","depth":"normal"},
    "mentioned_entities":{"people":[],"teams":["SRE"],"tools":[]},
    "unresolved_questions":[],"context_summary":"User asks who is on the SRE team."}"#;

const INTENT_RETRIEVE: &str = r#"{"intent_type":"procedure","conversation_type":"task",
    "needs_retrieval":true,"search_focus":[],
    "response_style":{"format":"steps","depth":"normal"},
    "mentioned_entities":{"people":[],"teams":[],"tools":[]},
    "unresolved_questions":[],"context_summary":""}"#;

async fn build_harness(
    intent_replies: Vec<&str>,
    generator: Arc<ScriptedModel>,
    with_reviewer: bool,
) -> Harness {
    let settings = Settings::default();
    let store = SqliteStore::connect_in_memory().await.unwrap();
    let embedder = Arc::new(DeterministicEmbedder::new(128));
    let vector_index = CountingIndex::new();
    let keyword_index = Arc::new(KeywordIndex::new(None).unwrap());
    let aliases = Arc::new(AliasRegistry::new(settings.alias.expansion_cap));

    let retriever = Arc::new(Retriever::new(
        RetrieverConfig::from_settings(&settings.retrieval),
        embedder.clone(),
        vector_index.clone(),
        keyword_index.clone(),
        aliases.clone(),
        store.clone(),
    ));

    let ingest = IngestPipeline::new(
        store.clone(),
        embedder.clone(),
        vector_index.clone(),
        keyword_index.clone(),
        aliases.clone(),
        SectionChunker::new(ChunkerConfig::default()),
        settings.retrieval.clone(),
        settings.alias.min_confidence,
    );

    let intent_model = ScriptedModel::new(intent_replies);
    let reviewer_model = ScriptedModel::new(vec![r#"{"needs_revision":false}"#; 8]);

    let deps = OrchestratorDeps {
        store: store.clone(),
        locks: ConversationLocks::new(),
        retriever,
        intent: Arc::new(IntentAnalyzer::new(intent_model, settings.llm.intent.clone())),
        generator,
        reviewer: with_reviewer.then(|| {
            Arc::new(Reviewer::new(reviewer_model, settings.llm.intent.clone()))
        }),
        quality: Arc::new(QualityAnalyzer::new()),
        prompts: Arc::new(ResponsePromptBuilder::default()),
        rate_limiter: Arc::new(TokenBucket::new(
            settings.ratelimit.tokens_per_min,
            Duration::from_secs(settings.ratelimit.max_wait_s),
        )),
        discovery: Arc::new(AliasDiscovery::new()),
    };

    Harness {
        orchestrator: Orchestrator::new(deps, settings),
        store,
        ingest,
        vector_index,
    }
}

fn request(user: &str, query: &str, request_id: &str) -> AnswerRequest {
    AnswerRequest {
        user_id: user.to_string(),
        conversation_id: None,
        query: query.to_string(),
        authors_note: None,
        request_id: request_id.to_string(),
    }
}

fn doc(id: &str, text: &str, days_old: i64) -> Document {
    Document {
        id: id.to_string(),
        source_url: format!("https://wiki.example.com/{}", id),
        source_kind: SourceKind::Wiki,
        title: format!("Page {}", id),
        text: text.to_string(),
        last_modified: Utc::now() - ChronoDuration::days(days_old),
        content_hash: Document::hash_content(text),
        tags: vec![],
    }
}

fn final_frame(frames: &[Frame]) -> (&str, f32) {
    let finals: Vec<_> = frames
        .iter()
        .filter_map(|f| match f {
            Frame::Final {
                message_id,
                confidence,
                ..
            } => Some((message_id.as_str(), *confidence)),
            _ => None,
        })
        .collect();
    assert_eq!(finals.len(), 1, "expected exactly one final frame");
    finals[0]
}

fn assert_no_errors(frames: &[Frame]) {
    assert!(
        !frames.iter().any(|f| matches!(f, Frame::Error { .. })),
        "unexpected error frame: {:?}",
        frames
    );
}

fn body_text(frames: &[Frame]) -> String {
    frames
        .iter()
        .filter_map(|f| match f {
            Frame::Token { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn greeting_skips_retrieval_entirely() {
    let generator = ScriptedModel::new(vec!["Hello! How can I help you today?"]);
    let harness = build_harness(vec![INTENT_GREETING], generator, false).await;

    let stream = harness
        .orchestrator
        .answer(request("u1", "hello", "r1"))
        .await
        .unwrap();
    let frames = stream.collect_all().await;

    assert_no_errors(&frames);
    // First frame is the analyzing step
    match &frames[0] {
        Frame::Step { seq, phase, .. } => {
            assert_eq!(*seq, 0);
            assert_eq!(*phase, StepPhase::Analyzing);
        }
        other => panic!("unexpected first frame: {:?}", other),
    }
    // No retrieval steps, no vector searches issued
    assert!(!frames.iter().any(|f| matches!(
        f,
        Frame::Step {
            phase: StepPhase::Retrieving,
            ..
        }
    )));
    assert_eq!(harness.vector_index.searches.load(Ordering::SeqCst), 0);

    // Sources frame present with empty items
    assert!(frames
        .iter()
        .any(|f| matches!(f, Frame::Sources { items, .. } if items.is_empty())));

    assert!(body_text(&frames).contains("Hello"));
    let (_, confidence) = final_frame(&frames);
    assert!(confidence >= 0.8);
}

#[tokio::test]
async fn team_inquiry_surfaces_outdated_conflict() {
    let generator = ScriptedModel::new(vec![
        "The SRE team is Alice Young, Bob Stone and Cara Dunn. Note that an older page omits Cara Dunn.",
    ]);
    let harness = build_harness(vec![INTENT_TEAM], generator, false).await;

    harness
        .ingest
        .ingest(&doc(
            "roster-current",
            "The SRE team members are Alice Young, Bob Stone and Cara Dunn.",
            10,
        ))
        .await
        .unwrap();
    harness
        .ingest
        .ingest(&doc(
            "roster-old",
            "The SRE team roster lists Alice Young and Bob Stone as contacts.",
            150,
        ))
        .await
        .unwrap();

    let stream = harness
        .orchestrator
        .answer(request("u1", "Who is on the SRE team?", "r1"))
        .await
        .unwrap();
    let frames = stream.collect_all().await;

    assert_no_errors(&frames);
    assert!(frames.iter().any(|f| matches!(
        f,
        Frame::Step {
            phase: StepPhase::Retrieving,
            ..
        }
    )));
    assert!(frames
        .iter()
        .any(|f| matches!(f, Frame::Step { message, .. } if message.starts_with("found 2"))));

    // One outdated/med conflict on the wire
    let conflict_items: Vec<_> = frames
        .iter()
        .filter_map(|f| match f {
            Frame::Conflicts { items } => Some(items.clone()),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(conflict_items.len(), 1);
    assert_eq!(
        conflict_items[0].kind,
        wiki_agent_core::ConflictKind::Outdated
    );
    assert_eq!(
        conflict_items[0].severity,
        wiki_agent_core::ConflictSeverity::Med
    );

    // Fresher source ranks first
    let sources = frames
        .iter()
        .find_map(|f| match f {
            Frame::Sources { items, .. } => Some(items.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(sources.len(), 2);
    assert!(sources[0].url.contains("roster-current"));

    let body = body_text(&frames);
    assert!(body.contains("Cara Dunn"));
    let (_, confidence) = final_frame(&frames);
    assert!(confidence <= 0.75);
}

#[tokio::test]
async fn alias_expansion_shows_up_in_steps_and_results() {
    let generator = ScriptedModel::new(vec![
        "The group goes by SRE internally; escalations go through their manager.",
    ]);
    let harness = build_harness(vec![INTENT_RETRIEVE], generator, false).await;

    // Teach the registry the alias through a page that names both terms
    harness
        .ingest
        .ingest(&doc(
            "sre-overview",
            "# Site Reliability\n\nThe Stallions Crew (SRE) owns paging. \
             The SRE escalation manager rotates weekly. SRE escalation policy lives here. \
             SRE covers production incidents.",
            5,
        ))
        .await
        .unwrap();
    harness.ingest.run_alias_discovery().await.unwrap();

    let stream = harness
        .orchestrator
        .answer(request("u1", "Who manages Stallions Crew?", "r1"))
        .await
        .unwrap();
    let frames = stream.collect_all().await;

    assert_no_errors(&frames);
    // Expansion surfaced in a step frame naming the expanded term
    assert!(frames.iter().any(|f| matches!(
        f,
        Frame::Step { message, .. } if message.starts_with("expanded query with") && message.contains("sre")
    )));
    let sources = frames
        .iter()
        .find_map(|f| match f {
            Frame::Sources { items, .. } => Some(items.clone()),
            _ => None,
        })
        .unwrap();
    assert!(!sources.is_empty());
    final_frame(&frames);
}

#[tokio::test]
async fn disconnect_persists_user_turn_only_and_invalidates_dedup() {
    let long_reply = "word ".repeat(200);
    let generator = ScriptedModel::slow(
        vec![long_reply.as_str(), "Fresh answer after reconnect."],
        Duration::from_millis(5),
    );
    let harness = build_harness(vec![INTENT_GREETING, INTENT_GREETING], generator, false).await;

    let mut stream: FrameStream = harness
        .orchestrator
        .answer(request("u1", "hello", "r1"))
        .await
        .unwrap();

    // Read until the third token frame, then hang up
    let mut tokens_seen = 0;
    while let Some(frame) = stream.next().await {
        if matches!(frame, Frame::Token { .. }) {
            tokens_seen += 1;
            if tokens_seen == 3 {
                break;
            }
        }
    }
    drop(stream);

    // Give the pipeline time to notice and abort
    tokio::time::sleep(Duration::from_millis(300)).await;

    let conversation = harness
        .store
        .get_or_create_active_conversation("u1")
        .await
        .unwrap();
    let messages = harness.store.messages(&conversation.id).await.unwrap();
    assert_eq!(messages.len(), 1, "only the user turn should persist");
    assert_eq!(messages[0].content, "hello");

    // The dedup entry is gone: an identical request starts fresh
    let stream = harness
        .orchestrator
        .answer(request("u1", "hello", "r2"))
        .await
        .unwrap();
    let frames = stream.collect_all().await;
    match &frames[0] {
        Frame::Step { seq, .. } => assert_eq!(*seq, 0, "second run must start a fresh stream"),
        other => panic!("unexpected first frame: {:?}", other),
    }
    assert_no_errors(&frames);
}

#[tokio::test]
async fn reviewer_requests_single_revision() {
    let generator = ScriptedModel::new(vec![
        "I don't have information about the deployment process.",
        "The deployment process starts from a release branch and runs the standard pipeline.",
    ]);
    let harness = build_harness(vec![INTENT_RETRIEVE], generator, true).await;

    harness
        .ingest
        .ingest(&doc(
            "deploys",
            "The deployment process starts from a release branch. Run the standard pipeline \
             and approve the deploy step in the release dashboard.",
            3,
        ))
        .await
        .unwrap();

    let stream = harness
        .orchestrator
        .answer(request("u1", "what is the deployment process", "r1"))
        .await
        .unwrap();
    let frames = stream.collect_all().await;

    assert_no_errors(&frames);
    assert!(frames.iter().any(|f| matches!(
        f,
        Frame::Step {
            phase: StepPhase::Reviewing,
            ..
        }
    )));
    let regen_steps = frames
        .iter()
        .filter(|f| matches!(f, Frame::Step { message, .. } if message == "regenerating"))
        .count();
    assert_eq!(regen_steps, 1, "exactly one revision pass");

    // The persisted assistant turn carries the revised body
    let conversation = harness
        .store
        .get_or_create_active_conversation("u1")
        .await
        .unwrap();
    let messages = harness.store.messages(&conversation.id).await.unwrap();
    let assistant = messages
        .iter()
        .find(|m| m.role == wiki_agent_core::MessageRole::Assistant)
        .unwrap();
    assert!(assistant.content.contains("release branch"));
    assert!(!assistant.content.contains("I don't have information"));
}

#[tokio::test]
async fn duplicate_requests_share_one_execution() {
    let generator = ScriptedModel::slow(
        vec!["A steady answer streamed in pieces for the client."],
        Duration::from_millis(5),
    );
    // One intent reply only: a second execution would fall back to the
    // default plan and retrieve, which the assertions would catch.
    let harness = build_harness(vec![INTENT_GREETING], generator, false).await;

    let first = harness
        .orchestrator
        .answer(request("u1", "hello", "r1"))
        .await
        .unwrap();
    let second = harness
        .orchestrator
        .answer(request("u1", "hello", "r2"))
        .await
        .unwrap();

    let (first_frames, second_frames) =
        tokio::join!(first.collect_all(), second.collect_all());

    assert_no_errors(&first_frames);
    assert_no_errors(&second_frames);
    assert_eq!(body_text(&first_frames), body_text(&second_frames));
    let (first_id, _) = final_frame(&first_frames);
    let (second_id, _) = final_frame(&second_frames);
    assert_eq!(first_id, second_id, "both streams come from one execution");

    // One user turn persisted, not two
    let conversation = harness
        .store
        .get_or_create_active_conversation("u1")
        .await
        .unwrap();
    let messages = harness.store.messages(&conversation.id).await.unwrap();
    let user_turns = messages
        .iter()
        .filter(|m| m.role == wiki_agent_core::MessageRole::User)
        .count();
    assert_eq!(user_turns, 1);
}

#[tokio::test]
async fn empty_query_is_rejected_before_any_stream() {
    let generator = ScriptedModel::new(vec![]);
    let harness = build_harness(vec![], generator, false).await;

    let err = harness
        .orchestrator
        .answer(request("u1", "", "r1"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadRequest);
}

#[tokio::test]
async fn empty_corpus_answers_with_low_confidence() {
    let generator = ScriptedModel::new(vec![
        "No authoritative source was found for this; generally, check the runbook index.",
    ]);
    let harness = build_harness(vec![INTENT_RETRIEVE], generator, false).await;

    let stream = harness
        .orchestrator
        .answer(request("u1", "how do I rotate the signing key", "r1"))
        .await
        .unwrap();
    let frames = stream.collect_all().await;

    assert_no_errors(&frames);
    assert!(frames
        .iter()
        .any(|f| matches!(f, Frame::Sources { items, .. } if items.is_empty())));
    let (_, confidence) = final_frame(&frames);
    assert!(confidence <= 0.4);
    assert!(body_text(&frames).contains("No authoritative source"));
}
