//! Embedding client seam

use async_trait::async_trait;

use crate::error::Result;

/// Produces fixed-dimension vectors for text.
///
/// Implementations must be deterministic for identical input and preserve
/// input order in batched calls. First use may require a slow warm-up;
/// callers surface that as a "loading model" reasoning step.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Vector dimension produced by this client
    fn dim(&self) -> usize;

    /// Load the model if it is not resident yet. May block up to 30 s.
    async fn warm(&self) -> Result<()>;

    /// Whether the model is already resident. Callers emit a "loading
    /// model" reasoning step when it is not.
    fn is_warm(&self) -> bool {
        true
    }

    /// Embed a batch of texts, one vector per input, in input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
