//! Hybrid retriever
//!
//! Expands the query through the alias registry and the intent plan, runs
//! the vector and keyword legs in parallel, merges candidates under a
//! deterministic weighted score, deduplicates and applies the staged
//! precision floors.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use wiki_agent_config::constants::retrieval;
use wiki_agent_config::RetrievalSettings;
use wiki_agent_core::text::shingled_jaccard;
use wiki_agent_core::{
    ChunkPayload, EmbeddingClient, IntentPlan, SourceItem, SourceKind, VectorIndex,
};
use wiki_agent_persistence::SqliteStore;

use crate::alias::AliasRegistry;
use crate::sparse_search::KeywordIndex;
use crate::RagError;

/// Retriever tuning, combining deployment settings with fixed weights
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Candidates per search leg per query
    pub k: usize,
    /// Final result cap
    pub cap: usize,
    /// Staged precision floors, strictest first
    pub precision_floors: Vec<f32>,
    /// Relaxation stops once this many results pass a floor
    pub min_results: usize,
    /// Candidates below this cosine never surface
    pub min_vector_score: f32,
    pub max_query_set: usize,
    pub max_chunks_per_doc: usize,
    pub near_dup_jaccard: f32,
    pub authority: HashMap<SourceKind, f32>,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self::from_settings(&RetrievalSettings::default())
    }
}

impl RetrieverConfig {
    pub fn from_settings(settings: &RetrievalSettings) -> Self {
        Self {
            k: settings.k,
            cap: settings.cap,
            precision_floors: settings.precision_floors.clone(),
            min_results: retrieval::MIN_RESULTS,
            min_vector_score: settings.min_vector_score,
            max_query_set: retrieval::MAX_QUERY_SET,
            max_chunks_per_doc: retrieval::MAX_CHUNKS_PER_DOC,
            near_dup_jaccard: retrieval::NEAR_DUP_JACCARD,
            authority: settings.authority.clone(),
        }
    }

    fn authority_for(&self, kind: SourceKind) -> f32 {
        self.authority
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_authority())
    }
}

/// One ranked retrieval candidate with its score breakdown
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: Uuid,
    pub document_id: String,
    pub score_vector: f32,
    pub score_keyword: f32,
    pub score_alias_boost: f32,
    pub authority: f32,
    pub freshness: f32,
    pub combined_score: f32,
    pub payload: ChunkPayload,
}

impl ScoredChunk {
    /// Shortened text for prompts and source frames
    pub fn excerpt(&self) -> String {
        const EXCERPT_CHARS: usize = 300;
        if self.payload.text.chars().count() <= EXCERPT_CHARS {
            self.payload.text.clone()
        } else {
            let cut: String = self.payload.text.chars().take(EXCERPT_CHARS).collect();
            format!("{}…", cut.trim_end())
        }
    }

    pub fn to_source_item(&self) -> SourceItem {
        SourceItem {
            url: self.payload.source_url.clone(),
            title: self.payload.title.clone(),
            excerpt: self.excerpt(),
            authority: self.authority,
            last_modified: self.payload.last_modified,
            score: self.combined_score,
        }
    }
}

/// Result of one retrieval call
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub chunks: Vec<ScoredChunk>,
    /// Alias expansions applied to the query
    pub expansions: Vec<String>,
    /// The full expanded query set that ran
    pub queries: Vec<String>,
    /// Set when embedding failed and only the keyword leg ran
    pub degraded: bool,
    /// The precision floor the results passed
    pub floor: f32,
}

/// Hybrid retrieval engine
pub struct Retriever {
    config: RetrieverConfig,
    embedder: Arc<dyn EmbeddingClient>,
    vector_index: Arc<dyn VectorIndex>,
    keyword_index: Arc<KeywordIndex>,
    aliases: Arc<AliasRegistry>,
    store: SqliteStore,
}

impl Retriever {
    pub fn new(
        config: RetrieverConfig,
        embedder: Arc<dyn EmbeddingClient>,
        vector_index: Arc<dyn VectorIndex>,
        keyword_index: Arc<KeywordIndex>,
        aliases: Arc<AliasRegistry>,
        store: SqliteStore,
    ) -> Self {
        Self {
            config,
            embedder,
            vector_index,
            keyword_index,
            aliases,
            store,
        }
    }

    /// Whether the embedding model is resident; callers surface a
    /// "loading model" step when it is not.
    pub fn embedder_is_warm(&self) -> bool {
        self.embedder.is_warm()
    }

    /// Run hybrid retrieval for a query.
    ///
    /// Embedding failure degrades to keyword-only search; a failing vector
    /// index fails the whole call so the caller can answer from
    /// conversation context alone.
    pub async fn retrieve(
        &self,
        query: &str,
        plan: Option<&IntentPlan>,
    ) -> Result<RetrievalOutcome, RagError> {
        self.retrieve_inner(query, plan, false).await
    }

    /// Keyword-only retrieval, used when the vector path timed out.
    /// Results carry the degraded flag.
    pub async fn retrieve_keyword_only(
        &self,
        query: &str,
        plan: Option<&IntentPlan>,
    ) -> Result<RetrievalOutcome, RagError> {
        self.retrieve_inner(query, plan, true).await
    }

    async fn retrieve_inner(
        &self,
        query: &str,
        plan: Option<&IntentPlan>,
        keyword_only: bool,
    ) -> Result<RetrievalOutcome, RagError> {
        let expansions = self.aliases.expansions(query);
        let queries = self.build_query_set(query, &expansions, plan);

        // Both legs run concurrently; the keyword leg is CPU-bound and
        // moves off the async executor.
        let keyword_index = Arc::clone(&self.keyword_index);
        let keyword_queries = queries.clone();
        let k = self.config.k;
        let keyword_leg = tokio::task::spawn_blocking(move || {
            let mut hits: HashMap<Uuid, (String, f32)> = HashMap::new();
            for q in &keyword_queries {
                for hit in keyword_index.search(q, k)? {
                    let entry = hits
                        .entry(hit.chunk_id)
                        .or_insert((hit.document_id.clone(), 0.0));
                    entry.1 = entry.1.max(hit.score);
                }
            }
            Ok::<_, RagError>(hits)
        });

        let vector_leg = async {
            if keyword_only {
                Ok((HashMap::new(), true))
            } else {
                self.vector_leg(&queries).await
            }
        };

        let (keyword_result, vector_result) = tokio::join!(keyword_leg, vector_leg);
        let keyword_hits = keyword_result
            .map_err(|e| RagError::KeywordIndex(format!("keyword search task failed: {}", e)))??;

        let (vector_hits, degraded) = vector_result?;

        let now = Utc::now();
        let mut candidates = self
            .merge_candidates(vector_hits, keyword_hits, &expansions, degraded, now)
            .await?;

        // Deterministic order: combined desc, then chunk id
        candidates.sort_by(|a, b| {
            b.combined_score
                .total_cmp(&a.combined_score)
                .then(a.chunk_id.cmp(&b.chunk_id))
        });

        let deduped = self.deduplicate(candidates);
        let (mut chunks, floor) = self.apply_precision_floors(deduped);
        chunks.truncate(self.config.cap);

        tracing::debug!(
            results = chunks.len(),
            floor,
            degraded,
            expansions = ?expansions,
            "Retrieval complete"
        );

        Ok(RetrievalOutcome {
            chunks,
            expansions,
            queries,
            degraded,
            floor,
        })
    }

    /// Original query, alias expansions, then intent search focus, capped
    /// and deduplicated case-insensitively.
    fn build_query_set(
        &self,
        query: &str,
        expansions: &[String],
        plan: Option<&IntentPlan>,
    ) -> Vec<String> {
        let mut queries: Vec<String> = Vec::new();
        let mut seen: Vec<String> = Vec::new();
        let mut push = |q: &str, queries: &mut Vec<String>, seen: &mut Vec<String>| {
            let key = q.trim().to_lowercase();
            if key.is_empty() || seen.contains(&key) {
                return;
            }
            seen.push(key);
            queries.push(q.trim().to_string());
        };

        push(query, &mut queries, &mut seen);
        for expansion in expansions {
            push(expansion, &mut queries, &mut seen);
        }
        if let Some(plan) = plan {
            for focus in &plan.search_focus {
                push(focus, &mut queries, &mut seen);
            }
        }
        queries.truncate(self.config.max_query_set);
        queries
    }

    /// Vector leg: embed the query set and search per query. Embedding
    /// failure flips the call to keyword-only; search failure is fatal.
    async fn vector_leg(
        &self,
        queries: &[String],
    ) -> Result<(HashMap<Uuid, (f32, ChunkPayload)>, bool), RagError> {
        let vectors = match self.embedder.embed(queries).await {
            Ok(vectors) => vectors,
            Err(e) => {
                tracing::warn!(error = %e, "Embedding failed, falling back to keyword-only");
                return Ok((HashMap::new(), true));
            }
        };

        let mut hits: HashMap<Uuid, (f32, ChunkPayload)> = HashMap::new();
        for vector in &vectors {
            let results = self
                .vector_index
                .search(vector, self.config.k, None)
                .await
                .map_err(|e| RagError::Unavailable(e.to_string()))?;
            for hit in results {
                match hits.get_mut(&hit.id) {
                    Some(existing) => existing.0 = existing.0.max(hit.score),
                    None => {
                        hits.insert(hit.id, (hit.score, hit.payload));
                    }
                }
            }
        }
        Ok((hits, false))
    }

    /// Merge both legs by chunk id and compute the score breakdown
    async fn merge_candidates(
        &self,
        vector_hits: HashMap<Uuid, (f32, ChunkPayload)>,
        keyword_hits: HashMap<Uuid, (String, f32)>,
        expansions: &[String],
        degraded: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        let keyword_max = keyword_hits
            .values()
            .map(|(_, s)| *s)
            .fold(0.0f32, f32::max);

        let mut candidates: Vec<ScoredChunk> = Vec::new();

        // Vector-leg candidates carry their payload already
        for (chunk_id, (score_vector, payload)) in &vector_hits {
            if *score_vector < self.config.min_vector_score {
                continue;
            }
            let score_keyword = keyword_hits
                .get(chunk_id)
                .map(|(_, s)| normalize_keyword(*s, keyword_max))
                .unwrap_or(0.0);
            candidates.push(self.score_candidate(
                *chunk_id,
                payload.clone(),
                *score_vector,
                score_keyword,
                expansions,
                now,
            ));
        }

        if degraded {
            // Keyword-only fallback: payloads come from the store
            for (chunk_id, (_document_id, raw_score)) in &keyword_hits {
                let Some((chunk, document)) = self.store.chunk_with_document(chunk_id).await?
                else {
                    continue;
                };
                let payload = ChunkPayload {
                    document_id: document.id.clone(),
                    ordinal: chunk.ordinal,
                    text: chunk.text.clone(),
                    section_path: chunk.section_path.clone(),
                    token_count: chunk.token_count,
                    title: document.title.clone(),
                    source_url: document.source_url.clone(),
                    source_kind: document.source_kind,
                    authority: self.config.authority_for(document.source_kind),
                    last_modified: document.last_modified,
                    alias_tags: chunk.semantic_tags.clone(),
                    semantic_tags: chunk.semantic_tags.clone(),
                };
                candidates.push(self.score_candidate(
                    *chunk_id,
                    payload,
                    0.0,
                    normalize_keyword(*raw_score, keyword_max),
                    expansions,
                    now,
                ));
            }
        }

        Ok(candidates)
    }

    fn score_candidate(
        &self,
        chunk_id: Uuid,
        payload: ChunkPayload,
        score_vector: f32,
        score_keyword: f32,
        expansions: &[String],
        now: DateTime<Utc>,
    ) -> ScoredChunk {
        let score_alias_boost = if payload
            .alias_tags
            .iter()
            .any(|tag| expansions.iter().any(|e| e.eq_ignore_ascii_case(tag)))
        {
            retrieval::ALIAS_BOOST
        } else {
            0.0
        };
        let authority = self.config.authority_for(payload.source_kind);
        let freshness = freshness_score(payload.last_modified, now);

        let combined_score = retrieval::WEIGHT_VECTOR * score_vector
            + retrieval::WEIGHT_KEYWORD * score_keyword
            + retrieval::WEIGHT_AUTHORITY * authority
            + retrieval::WEIGHT_FRESHNESS * freshness
            + retrieval::WEIGHT_ALIAS_BOOST * if score_alias_boost > 0.0 { 1.0 } else { 0.0 };

        ScoredChunk {
            chunk_id,
            document_id: payload.document_id.clone(),
            score_vector,
            score_keyword,
            score_alias_boost,
            authority,
            freshness,
            combined_score,
            payload,
        }
    }

    /// At most N chunks per document, and no near-duplicates of a
    /// higher-ranked chunk. Input must already be sorted.
    fn deduplicate(&self, candidates: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
        let mut per_doc: HashMap<String, usize> = HashMap::new();
        let mut kept: Vec<ScoredChunk> = Vec::new();

        'outer: for candidate in candidates {
            let count = per_doc.entry(candidate.document_id.clone()).or_insert(0);
            if *count >= self.config.max_chunks_per_doc {
                continue;
            }
            for existing in &kept {
                let similarity =
                    shingled_jaccard(&existing.payload.text, &candidate.payload.text, 4);
                if similarity >= self.config.near_dup_jaccard {
                    continue 'outer;
                }
            }
            *count += 1;
            kept.push(candidate);
        }
        kept
    }

    /// Staged precision: strictest floor that still yields enough results
    fn apply_precision_floors(&self, candidates: Vec<ScoredChunk>) -> (Vec<ScoredChunk>, f32) {
        let mut floor = *self.config.precision_floors.last().unwrap_or(&0.0);
        for candidate_floor in &self.config.precision_floors {
            let passing = candidates
                .iter()
                .filter(|c| c.combined_score >= *candidate_floor)
                .count();
            if passing >= self.config.min_results {
                floor = *candidate_floor;
                break;
            }
        }
        let passing: Vec<ScoredChunk> = candidates
            .into_iter()
            .filter(|c| c.combined_score >= floor)
            .collect();
        (passing, floor)
    }
}

fn normalize_keyword(raw: f32, max: f32) -> f32 {
    if max > 0.0 {
        (raw / max).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Freshness decays linearly to a floor over the configured horizon
pub fn freshness_score(last_modified: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
    let days = (now - last_modified).num_seconds() as f32 / 86_400.0;
    (1.0 - days / retrieval::FRESHNESS_HORIZON_DAYS).clamp(retrieval::FRESHNESS_FLOOR, 1.0)
}
