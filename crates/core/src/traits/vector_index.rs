//! Vector index seam

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::SourceKind;
use crate::error::Result;

/// Payload stored alongside each vector point. Mirrors the chunk plus the
/// parent-document fields retrieval scoring needs without a second lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub document_id: String,
    pub ordinal: u32,
    pub text: String,
    #[serde(default)]
    pub section_path: Vec<String>,
    pub token_count: u32,
    pub title: String,
    pub source_url: String,
    pub source_kind: SourceKind,
    pub authority: f32,
    pub last_modified: DateTime<Utc>,
    /// Alias terms attached to this chunk, used for retrieval boosts
    #[serde(default)]
    pub alias_tags: Vec<String>,
    #[serde(default)]
    pub semantic_tags: Vec<String>,
}

/// One `(id, vector, payload)` tuple
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// A scored hit from a k-NN search
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: Uuid,
    /// Cosine similarity, higher is better
    pub score: f32,
    pub payload: ChunkPayload,
}

/// Metadata filter applied server-side where supported
#[derive(Debug, Clone, Default)]
pub struct IndexFilter {
    pub document_id: Option<String>,
    pub source_kind: Option<SourceKind>,
}

impl IndexFilter {
    pub fn is_empty(&self) -> bool {
        self.document_id.is_none() && self.source_kind.is_none()
    }
}

/// One page of a maintenance scroll
#[derive(Debug, Clone)]
pub struct ScrollPage {
    pub points: Vec<VectorPoint>,
    pub next_cursor: Option<String>,
}

/// Persists `(id, vector, payload)` tuples and answers k-NN queries.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Idempotent by point id
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()>;

    /// Top-k by cosine similarity, descending
    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<IndexFilter>,
    ) -> Result<Vec<SearchHit>>;

    /// Page through points for maintenance jobs
    async fn scroll(
        &self,
        filter: Option<IndexFilter>,
        cursor: Option<String>,
    ) -> Result<ScrollPage>;

    /// Remove every point belonging to a document (purge path)
    async fn delete_by_document(&self, document_id: &str) -> Result<()>;
}
