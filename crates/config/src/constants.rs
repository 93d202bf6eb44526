//! Centralized defaults
//!
//! Single source of truth for values that must agree between `Settings`
//! defaults and component-level `Default` impls.

/// Embedding service defaults
pub mod embedding {
    pub const DIM: usize = 384;
    pub const BATCH: usize = 32;
    pub const MAX_RETRIES: u32 = 3;
    pub const INITIAL_BACKOFF_MS: u64 = 250;
    pub const WARMUP_TIMEOUT_S: u64 = 30;
}

/// Retrieval engine defaults
pub mod retrieval {
    /// Per-query candidates from each search leg
    pub const K: usize = 25;
    /// Final result cap
    pub const CAP: usize = 10;
    /// Staged precision floors, strictest first
    pub const PRECISION_FLOORS: [f32; 3] = [0.75, 0.50, 0.30];
    /// Floor relaxation stops once this many results are in hand
    pub const MIN_RESULTS: usize = 3;
    /// Candidates below this cosine never surface
    pub const MIN_VECTOR_SCORE: f32 = 0.20;
    /// Expanded query set cap (original + aliases + search focus)
    pub const MAX_QUERY_SET: usize = 8;
    /// At most this many chunks per parent document
    pub const MAX_CHUNKS_PER_DOC: usize = 2;
    /// Near-duplicate threshold on shingled Jaccard
    pub const NEAR_DUP_JACCARD: f32 = 0.85;
    /// Combined-score weights
    pub const WEIGHT_VECTOR: f32 = 0.50;
    pub const WEIGHT_KEYWORD: f32 = 0.20;
    pub const WEIGHT_AUTHORITY: f32 = 0.15;
    pub const WEIGHT_FRESHNESS: f32 = 0.10;
    pub const WEIGHT_ALIAS_BOOST: f32 = 0.05;
    pub const ALIAS_BOOST: f32 = 0.05;
    /// Freshness decays to its floor over this horizon
    pub const FRESHNESS_HORIZON_DAYS: f32 = 180.0;
    pub const FRESHNESS_FLOOR: f32 = 0.2;
}

/// Alias registry defaults
pub mod alias {
    pub const EXPANSION_CAP: usize = 5;
    /// Below this an edge is excluded from expansion (kept for audit)
    pub const MIN_CONFIDENCE: f32 = 0.30;
    /// Below this an edge is soft-deleted
    pub const SOFT_DELETE_FLOOR: f32 = 0.10;
    pub const REINFORCEMENT_STEP: f32 = 0.10;
    pub const DECAY_FACTOR: f32 = 0.97;
    /// Edges idle this long start decaying
    pub const DECAY_INTERVAL_DAYS: i64 = 7;
}

/// LLM defaults for the two configured model instances
pub mod llm {
    pub const INTENT_MODEL: &str = "intent-small";
    pub const INTENT_TEMPERATURE: f32 = 0.1;
    pub const INTENT_MAX_TOKENS: u32 = 400;

    pub const MAIN_MODEL: &str = "main-large";
    pub const MAIN_TEMPERATURE: f32 = 0.3;
    pub const MAIN_MAX_TOKENS: u32 = 1500;

    /// Token budget for retrieved context in the main prompt
    pub const CONTEXT_TOKEN_BUDGET: usize = 6000;
}

/// Conversation history shaping
pub mod conversation {
    pub const TRUNCATE_CHARS: usize = 3000;
    pub const KEEP_EXCHANGES: usize = 4;
    /// Refresh the persisted summary every N exchanges
    pub const SUMMARY_REFRESH: usize = 3;
    pub const IDLE_TIMEOUT_S: u64 = 60 * 60 * 24;
}

/// Per-phase timeouts
pub mod timeouts {
    pub const INTENT_S: u64 = 5;
    pub const RETRIEVAL_S: u64 = 10;
    pub const REVIEWER_S: u64 = 5;
    pub const TOTAL_S: u64 = 120;
}

/// Dedup coalescing
pub mod dedup {
    pub const WINDOW_S: u64 = 2;
    pub const BUFFER_STEPS: usize = 64;
}

/// Rate limiting
pub mod ratelimit {
    pub const TOKENS_PER_MIN: u64 = 90_000;
    pub const MAX_WAIT_S: u64 = 5;
}

/// External endpoints
pub mod endpoints {
    pub const QDRANT_DEFAULT: &str = "http://localhost:6334";
    pub const EMBEDDING_DEFAULT: &str = "http://localhost:8089";
    pub const LLM_DEFAULT: &str = "http://localhost:11434/v1";
}
