//! Main settings tree

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use wiki_agent_core::SourceKind;

use crate::constants::{
    alias, conversation, dedup, embedding, endpoints, llm, ratelimit, retrieval, timeouts,
};
use crate::ConfigError;

/// Top-level application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub embedding: EmbeddingSettings,

    #[serde(default)]
    pub vector_index: VectorIndexSettings,

    #[serde(default)]
    pub retrieval: RetrievalSettings,

    #[serde(default)]
    pub alias: AliasSettings,

    #[serde(default)]
    pub llm: LlmSettings,

    #[serde(default)]
    pub conversation: ConversationSettings,

    #[serde(default)]
    pub timeouts: TimeoutSettings,

    #[serde(default)]
    pub dedup: DedupSettings,

    #[serde(default)]
    pub ratelimit: RateLimitSettings,

    #[serde(default)]
    pub persistence: PersistenceSettings,

    #[serde(default)]
    pub observability: ObservabilitySettings,
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retrieval.validate()?;
        self.alias.validate()?;
        self.llm.validate()?;
        if self.embedding.dim == 0 {
            return Err(ConfigError::InvalidValue {
                field: "embedding.dim".into(),
                message: "must be positive".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_port() -> u16 {
    8080
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

/// Embedding service connection and retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dim")]
    pub dim: usize,
    #[serde(default = "default_embedding_batch")]
    pub batch: usize,
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_backoff_ms")]
    pub initial_backoff_ms: u64,
}

fn default_embedding_endpoint() -> String {
    endpoints::EMBEDDING_DEFAULT.to_string()
}

fn default_embedding_model() -> String {
    "all-minilm-l6-v2".to_string()
}

fn default_embedding_dim() -> usize {
    embedding::DIM
}

fn default_embedding_batch() -> usize {
    embedding::BATCH
}

fn default_embedding_retries() -> u32 {
    embedding::MAX_RETRIES
}

fn default_embedding_backoff_ms() -> u64 {
    embedding::INITIAL_BACKOFF_MS
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            endpoint: default_embedding_endpoint(),
            model: default_embedding_model(),
            dim: default_embedding_dim(),
            batch: default_embedding_batch(),
            max_retries: default_embedding_retries(),
            initial_backoff_ms: default_embedding_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndexSettings {
    #[serde(default = "default_qdrant_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_qdrant_endpoint() -> String {
    endpoints::QDRANT_DEFAULT.to_string()
}

fn default_collection() -> String {
    "wiki_chunks".to_string()
}

impl Default for VectorIndexSettings {
    fn default() -> Self {
        Self {
            endpoint: default_qdrant_endpoint(),
            collection: default_collection(),
            api_key: None,
        }
    }
}

/// Retrieval engine weights and floors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSettings {
    #[serde(default = "default_retrieval_k")]
    pub k: usize,
    #[serde(default = "default_retrieval_cap")]
    pub cap: usize,
    #[serde(default = "default_precision_floors")]
    pub precision_floors: Vec<f32>,
    #[serde(default = "default_min_vector_score")]
    pub min_vector_score: f32,
    /// Authority per source kind; defaults are fixed policy
    #[serde(default = "default_authority")]
    pub authority: HashMap<SourceKind, f32>,
}

fn default_retrieval_k() -> usize {
    retrieval::K
}

fn default_retrieval_cap() -> usize {
    retrieval::CAP
}

fn default_precision_floors() -> Vec<f32> {
    retrieval::PRECISION_FLOORS.to_vec()
}

fn default_min_vector_score() -> f32 {
    retrieval::MIN_VECTOR_SCORE
}

fn default_authority() -> HashMap<SourceKind, f32> {
    [
        SourceKind::Wiki,
        SourceKind::Confluence,
        SourceKind::Sharepoint,
        SourceKind::Github,
        SourceKind::Other,
    ]
    .into_iter()
    .map(|k| (k, k.default_authority()))
    .collect()
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            k: default_retrieval_k(),
            cap: default_retrieval_cap(),
            precision_floors: default_precision_floors(),
            min_vector_score: default_min_vector_score(),
            authority: default_authority(),
        }
    }
}

impl RetrievalSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.precision_floors.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.precision_floors".into(),
                message: "at least one floor is required".into(),
            });
        }
        for floor in &self.precision_floors {
            if !(0.0..=1.0).contains(floor) {
                return Err(ConfigError::InvalidValue {
                    field: "retrieval.precision_floors".into(),
                    message: format!("floor {} outside [0, 1]", floor),
                });
            }
        }
        for (kind, value) in &self.authority {
            if !(0.0..=1.0).contains(value) {
                return Err(ConfigError::InvalidValue {
                    field: format!("retrieval.authority.{}", kind),
                    message: format!("must be between 0.0 and 1.0, got {}", value),
                });
            }
        }
        Ok(())
    }

    pub fn authority_for(&self, kind: SourceKind) -> f32 {
        self.authority
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_authority())
    }
}

/// Alias registry tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliasSettings {
    #[serde(default = "default_expansion_cap")]
    pub expansion_cap: usize,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default = "default_decay_factor")]
    pub decay_factor: f32,
    #[serde(default = "default_decay_interval_days")]
    pub decay_interval_days: i64,
}

fn default_expansion_cap() -> usize {
    alias::EXPANSION_CAP
}

fn default_min_confidence() -> f32 {
    alias::MIN_CONFIDENCE
}

fn default_decay_factor() -> f32 {
    alias::DECAY_FACTOR
}

fn default_decay_interval_days() -> i64 {
    alias::DECAY_INTERVAL_DAYS
}

impl Default for AliasSettings {
    fn default() -> Self {
        Self {
            expansion_cap: default_expansion_cap(),
            min_confidence: default_min_confidence(),
            decay_factor: default_decay_factor(),
            decay_interval_days: default_decay_interval_days(),
        }
    }
}

impl AliasSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::InvalidValue {
                field: "alias.min_confidence".into(),
                message: format!("must be between 0.0 and 1.0, got {}", self.min_confidence),
            });
        }
        if !(0.0..1.0).contains(&self.decay_factor) {
            return Err(ConfigError::InvalidValue {
                field: "alias.decay_factor".into(),
                message: format!("must be in [0, 1), got {}", self.decay_factor),
            });
        }
        Ok(())
    }
}

/// One configured chat model instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// LLM endpoint plus the two model instances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_intent_model")]
    pub intent: ModelSettings,
    #[serde(default = "default_main_model")]
    pub main: ModelSettings,
    #[serde(default = "default_context_token_budget")]
    pub context_token_budget: usize,
}

fn default_llm_endpoint() -> String {
    endpoints::LLM_DEFAULT.to_string()
}

fn default_intent_model() -> ModelSettings {
    ModelSettings {
        model: llm::INTENT_MODEL.to_string(),
        temperature: llm::INTENT_TEMPERATURE,
        max_tokens: llm::INTENT_MAX_TOKENS,
    }
}

fn default_main_model() -> ModelSettings {
    ModelSettings {
        model: llm::MAIN_MODEL.to_string(),
        temperature: llm::MAIN_TEMPERATURE,
        max_tokens: llm::MAIN_MAX_TOKENS,
    }
}

fn default_context_token_budget() -> usize {
    llm::CONTEXT_TOKEN_BUDGET
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: None,
            intent: default_intent_model(),
            main: default_main_model(),
            context_token_budget: default_context_token_budget(),
        }
    }
}

impl LlmSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, m) in [("intent", &self.intent), ("main", &self.main)] {
            if !(0.0..=2.0).contains(&m.temperature) {
                return Err(ConfigError::InvalidValue {
                    field: format!("llm.{}.temperature", name),
                    message: format!("must be between 0.0 and 2.0, got {}", m.temperature),
                });
            }
            if m.max_tokens == 0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("llm.{}.max_tokens", name),
                    message: "must be positive".into(),
                });
            }
        }
        Ok(())
    }
}

/// Conversation windowing and summary refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSettings {
    #[serde(default = "default_truncate_chars")]
    pub truncate_chars: usize,
    #[serde(default = "default_keep_exchanges")]
    pub keep_exchanges: usize,
    #[serde(default = "default_summary_refresh")]
    pub summary_refresh: usize,
    #[serde(default = "default_idle_timeout_s")]
    pub idle_timeout_s: u64,
}

fn default_truncate_chars() -> usize {
    conversation::TRUNCATE_CHARS
}

fn default_keep_exchanges() -> usize {
    conversation::KEEP_EXCHANGES
}

fn default_summary_refresh() -> usize {
    conversation::SUMMARY_REFRESH
}

fn default_idle_timeout_s() -> u64 {
    conversation::IDLE_TIMEOUT_S
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            truncate_chars: default_truncate_chars(),
            keep_exchanges: default_keep_exchanges(),
            summary_refresh: default_summary_refresh(),
            idle_timeout_s: default_idle_timeout_s(),
        }
    }
}

/// Per-phase timeouts in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_intent_s")]
    pub intent_s: u64,
    #[serde(default = "default_retrieval_s")]
    pub retrieval_s: u64,
    #[serde(default = "default_reviewer_s")]
    pub reviewer_s: u64,
    #[serde(default = "default_total_s")]
    pub total_s: u64,
}

fn default_intent_s() -> u64 {
    timeouts::INTENT_S
}

fn default_retrieval_s() -> u64 {
    timeouts::RETRIEVAL_S
}

fn default_reviewer_s() -> u64 {
    timeouts::REVIEWER_S
}

fn default_total_s() -> u64 {
    timeouts::TOTAL_S
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            intent_s: default_intent_s(),
            retrieval_s: default_retrieval_s(),
            reviewer_s: default_reviewer_s(),
            total_s: default_total_s(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupSettings {
    #[serde(default = "default_dedup_window_s")]
    pub window_s: u64,
    #[serde(default = "default_dedup_buffer")]
    pub buffer_steps: usize,
}

fn default_dedup_window_s() -> u64 {
    dedup::WINDOW_S
}

fn default_dedup_buffer() -> usize {
    dedup::BUFFER_STEPS
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            window_s: default_dedup_window_s(),
            buffer_steps: default_dedup_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_tokens_per_min")]
    pub tokens_per_min: u64,
    #[serde(default = "default_ratelimit_wait_s")]
    pub max_wait_s: u64,
}

fn default_tokens_per_min() -> u64 {
    ratelimit::TOKENS_PER_MIN
}

fn default_ratelimit_wait_s() -> u64 {
    ratelimit::MAX_WAIT_S
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            tokens_per_min: default_tokens_per_min(),
            max_wait_s: default_ratelimit_wait_s(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSettings {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "data/wiki-agent.db".to_string()
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let s = Settings::default();
        assert_eq!(s.embedding.dim, 384);
        assert_eq!(s.embedding.batch, 32);
        assert_eq!(s.retrieval.k, 25);
        assert_eq!(s.retrieval.cap, 10);
        assert_eq!(s.retrieval.precision_floors, vec![0.75, 0.50, 0.30]);
        assert_eq!(s.alias.expansion_cap, 5);
        assert_eq!(s.alias.min_confidence, 0.30);
        assert_eq!(s.alias.decay_factor, 0.97);
        assert_eq!(s.alias.decay_interval_days, 7);
        assert_eq!(s.llm.intent.model, "intent-small");
        assert_eq!(s.llm.intent.temperature, 0.1);
        assert_eq!(s.llm.intent.max_tokens, 400);
        assert_eq!(s.llm.main.model, "main-large");
        assert_eq!(s.llm.main.temperature, 0.3);
        assert_eq!(s.llm.main.max_tokens, 1500);
        assert_eq!(s.conversation.truncate_chars, 3000);
        assert_eq!(s.conversation.keep_exchanges, 4);
        assert_eq!(s.conversation.summary_refresh, 3);
        assert_eq!(s.timeouts.intent_s, 5);
        assert_eq!(s.timeouts.retrieval_s, 10);
        assert_eq!(s.timeouts.reviewer_s, 5);
        assert_eq!(s.timeouts.total_s, 120);
        assert_eq!(s.dedup.window_s, 2);
        assert_eq!(s.dedup.buffer_steps, 64);
    }

    #[test]
    fn default_authority_matches_source_kinds() {
        let s = RetrievalSettings::default();
        assert_eq!(s.authority_for(SourceKind::Wiki), 0.9);
        assert_eq!(s.authority_for(SourceKind::Confluence), 0.8);
        assert_eq!(s.authority_for(SourceKind::Sharepoint), 0.7);
        assert_eq!(s.authority_for(SourceKind::Github), 0.7);
        assert_eq!(s.authority_for(SourceKind::Other), 0.5);
    }

    #[test]
    fn validate_rejects_bad_floor() {
        let mut s = Settings::default();
        s.retrieval.precision_floors = vec![1.5];
        assert!(s.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_decay() {
        let mut s = Settings::default();
        s.alias.decay_factor = 1.0;
        assert!(s.validate().is_err());
    }
}
