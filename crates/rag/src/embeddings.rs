//! Embedding clients
//!
//! The production client speaks to an external embedding service over
//! HTTP. Batched calls preserve input order; transient failures retry with
//! jittered exponential backoff. A deterministic hash-based embedder backs
//! tests and degraded local runs.

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use wiki_agent_core::{EmbeddingClient, Error, Result};

/// HTTP embedder configuration
#[derive(Debug, Clone)]
pub struct HttpEmbedderConfig {
    pub endpoint: String,
    pub model: String,
    pub dim: usize,
    pub batch: usize,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    /// First-use model load may take this long
    pub warmup_timeout: Duration,
}

impl Default for HttpEmbedderConfig {
    fn default() -> Self {
        use wiki_agent_config::constants::{embedding, endpoints};
        Self {
            endpoint: endpoints::EMBEDDING_DEFAULT.to_string(),
            model: "all-minilm-l6-v2".to_string(),
            dim: embedding::DIM,
            batch: embedding::BATCH,
            max_retries: embedding::MAX_RETRIES,
            initial_backoff: Duration::from_millis(embedding::INITIAL_BACKOFF_MS),
            warmup_timeout: Duration::from_secs(embedding::WARMUP_TIMEOUT_S),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedding client backed by an external HTTP service
pub struct HttpEmbedder {
    client: Client,
    config: HttpEmbedderConfig,
    warmed: std::sync::atomic::AtomicBool,
}

impl HttpEmbedder {
    pub fn new(config: HttpEmbedderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.warmup_timeout)
            .build()
            .map_err(|e| Error::Embedding(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            config,
            warmed: std::sync::atomic::AtomicBool::new(false),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.config.model,
            input: texts,
        };
        let url = format!("{}/embed", self.config.endpoint.trim_end_matches('/'));

        let mut backoff = self.config.initial_backoff;
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Full jitter keeps a thundering herd of workers apart
                let jitter = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 2);
                let wait = backoff + Duration::from_millis(jitter);
                tracing::warn!(
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    "Embedding request failed, retrying"
                );
                tokio::time::sleep(wait).await;
                backoff *= 2;
            }

            match self.execute(&url, &request).await {
                Ok(vectors) => {
                    if vectors.len() != texts.len() {
                        return Err(Error::Embedding(format!(
                            "embedding count mismatch: sent {}, got {}",
                            texts.len(),
                            vectors.len()
                        )));
                    }
                    self.warmed.store(true, std::sync::atomic::Ordering::Relaxed);
                    return Ok(vectors);
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Embedding("max retries exceeded".into())))
    }

    async fn execute(&self, url: &str, request: &EmbedRequest<'_>) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("embedding request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!(
                "embedding service returned {}: {}",
                status, body
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("invalid embedding response: {}", e)))?;
        Ok(parsed.embeddings)
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbedder {
    fn dim(&self) -> usize {
        self.config.dim
    }

    async fn warm(&self) -> Result<()> {
        // One tiny request forces the service to load the model
        self.embed_batch(&["warmup".to_string()]).await.map(|_| ())
    }

    fn is_warm(&self) -> bool {
        self.warmed.load(std::sync::atomic::Ordering::Relaxed)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch.max(1)) {
            all.extend(self.embed_batch(batch).await?);
        }
        Ok(all)
    }
}

/// Deterministic embedder for tests and keyword-only degraded runs.
///
/// Hashes word tokens into a fixed number of buckets and L2-normalizes, so
/// identical input always yields identical vectors and token overlap shows
/// up as cosine similarity.
pub struct DeterministicEmbedder {
    dim: usize,
}

impl DeterministicEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for word in wiki_agent_core::text::content_words(text) {
            let mut hasher = Sha256::new();
            hasher.update(word.as_bytes());
            let digest = hasher.finalize();
            let bucket = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
                % self.dim;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for DeterministicEmbedder {
    fn default() -> Self {
        Self::new(wiki_agent_config::constants::embedding::DIM)
    }
}

#[async_trait]
impl EmbeddingClient for DeterministicEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn warm(&self) -> Result<()> {
        Ok(())
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Exact-string cache in front of any embedding client.
///
/// Retrieval embeds each expanded query once; repeated queries across
/// requests hit the cache instead of the service.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingClient>,
    cache: dashmap::DashMap<String, Vec<f32>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingClient>) -> Self {
        Self {
            inner,
            cache: dashmap::DashMap::new(),
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl EmbeddingClient for CachedEmbedder {
    fn dim(&self) -> usize {
        self.inner.dim()
    }

    async fn warm(&self) -> Result<()> {
        self.inner.warm().await
    }

    fn is_warm(&self) -> bool {
        self.inner.is_warm()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results: Vec<Option<Vec<f32>>> = texts
            .iter()
            .map(|t| self.cache.get(t).map(|v| v.clone()))
            .collect();

        let missing: Vec<String> = texts
            .iter()
            .zip(&results)
            .filter(|(_, cached)| cached.is_none())
            .map(|(t, _)| t.clone())
            .collect();

        if !missing.is_empty() {
            let fresh = self.inner.embed(&missing).await?;
            let mut fresh_iter = fresh.into_iter();
            for (text, slot) in texts.iter().zip(results.iter_mut()) {
                if slot.is_none() {
                    let vector = fresh_iter
                        .next()
                        .ok_or_else(|| Error::Embedding("embedding batch came up short".into()))?;
                    self.cache.insert(text.clone(), vector.clone());
                    *slot = Some(vector);
                }
            }
        }

        Ok(results.into_iter().map(|v| v.unwrap_or_default()).collect())
    }
}

/// Cosine similarity between two vectors
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deterministic_embedder_is_deterministic() {
        let embedder = DeterministicEmbedder::new(64);
        let texts = vec!["the deploy pipeline".to_string()];
        let a = embedder.embed(&texts).await.unwrap();
        let b = embedder.embed(&texts).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
    }

    #[tokio::test]
    async fn similar_text_scores_higher_than_unrelated() {
        let embedder = DeterministicEmbedder::new(128);
        let vectors = embedder
            .embed(&[
                "sre team on-call rotation".to_string(),
                "on-call rotation for the sre team".to_string(),
                "chocolate cake recipe".to_string(),
            ])
            .await
            .unwrap();
        let similar = cosine(&vectors[0], &vectors[1]);
        let unrelated = cosine(&vectors[0], &vectors[2]);
        assert!(similar > unrelated);
        assert!(similar > 0.9);
    }

    #[tokio::test]
    async fn cache_serves_repeat_queries() {
        let embedder = CachedEmbedder::new(Arc::new(DeterministicEmbedder::new(32)));
        let texts = vec!["release process".to_string()];
        let first = embedder.embed(&texts).await.unwrap();
        assert_eq!(embedder.cache_len(), 1);
        let second = embedder.embed(&texts).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(embedder.cache_len(), 1);
    }

    #[tokio::test]
    async fn batch_preserves_input_order() {
        let embedder = CachedEmbedder::new(Arc::new(DeterministicEmbedder::new(32)));
        // Prime the cache with one entry so the batch mixes hits and misses
        embedder.embed(&["beta".to_string()]).await.unwrap();
        let texts = vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()];
        let batch = embedder.embed(&texts).await.unwrap();
        let singles: Vec<Vec<f32>> = {
            let mut out = Vec::new();
            for t in &texts {
                out.push(embedder.embed(&[t.clone()]).await.unwrap().remove(0));
            }
            out
        };
        assert_eq!(batch, singles);
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.3, 0.4, 0.5];
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-6);
    }
}
