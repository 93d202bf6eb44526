//! Ingest pipeline
//!
//! Upsert a document, re-chunk when its content hash changed, embed the
//! new chunks, upsert vector points and refresh the keyword index. Alias
//! discovery re-runs over the full document set after each round.

use std::sync::Arc;

use wiki_agent_config::RetrievalSettings;
use wiki_agent_core::{ChunkPayload, Document, EmbeddingClient, VectorIndex, VectorPoint};
use wiki_agent_persistence::SqliteStore;

use crate::alias::{AliasDiscovery, AliasRegistry, DiscoveryReport};
use crate::chunker::SectionChunker;
use crate::sparse_search::KeywordIndex;
use crate::RagError;

/// Outcome of one document ingest
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestReport {
    /// Content hash differed; chunks and vectors were rebuilt
    pub changed: bool,
    pub chunks: usize,
}

/// Document ingest pipeline
pub struct IngestPipeline {
    store: SqliteStore,
    embedder: Arc<dyn EmbeddingClient>,
    vector_index: Arc<dyn VectorIndex>,
    keyword_index: Arc<KeywordIndex>,
    aliases: Arc<AliasRegistry>,
    discovery: AliasDiscovery,
    chunker: SectionChunker,
    retrieval: RetrievalSettings,
    min_alias_confidence: f32,
}

impl IngestPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: SqliteStore,
        embedder: Arc<dyn EmbeddingClient>,
        vector_index: Arc<dyn VectorIndex>,
        keyword_index: Arc<KeywordIndex>,
        aliases: Arc<AliasRegistry>,
        chunker: SectionChunker,
        retrieval: RetrievalSettings,
        min_alias_confidence: f32,
    ) -> Self {
        Self {
            store,
            embedder,
            vector_index,
            keyword_index,
            aliases,
            discovery: AliasDiscovery::new(),
            chunker,
            retrieval,
            min_alias_confidence,
        }
    }

    /// Upsert one document. Chunking, embedding and index updates only
    /// happen when the content hash changed, which keeps re-ingesting an
    /// unchanged corpus cheap and idempotent.
    pub async fn ingest(&self, document: &Document) -> Result<IngestReport, RagError> {
        let changed = self.store.upsert_document(document).await?;
        if !changed {
            tracing::debug!(document_id = %document.id, "Ingest skipped, content unchanged");
            return Ok(IngestReport {
                changed: false,
                chunks: 0,
            });
        }

        let mut chunks = self.chunker.chunk(document);
        for chunk in &mut chunks {
            chunk.semantic_tags = self.aliases.tags_for_text(&chunk.text);
        }
        self.store.replace_chunks(&document.id, &chunks).await?;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        let authority = self.retrieval.authority_for(document.source_kind);
        let points: Vec<VectorPoint> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorPoint {
                id: chunk.id,
                vector,
                payload: ChunkPayload {
                    document_id: document.id.clone(),
                    ordinal: chunk.ordinal,
                    text: chunk.text.clone(),
                    section_path: chunk.section_path.clone(),
                    token_count: chunk.token_count,
                    title: document.title.clone(),
                    source_url: document.source_url.clone(),
                    source_kind: document.source_kind,
                    authority,
                    last_modified: document.last_modified,
                    alias_tags: chunk.semantic_tags.clone(),
                    semantic_tags: chunk.semantic_tags.clone(),
                },
            })
            .collect();

        self.vector_index
            .upsert(points)
            .await
            .map_err(|e| RagError::VectorIndex(e.to_string()))?;

        let keyword_entries: Vec<(uuid::Uuid, String)> =
            chunks.iter().map(|c| (c.id, c.text.clone())).collect();
        self.keyword_index
            .reindex_document(&document.id, &keyword_entries)?;

        tracing::info!(
            document_id = %document.id,
            chunks = chunks.len(),
            "Document ingested"
        );

        Ok(IngestReport {
            changed: true,
            chunks: chunks.len(),
        })
    }

    /// Re-run alias discovery over the whole corpus and refresh the
    /// registry read view. Runs on worker pools, never on request paths.
    pub async fn run_alias_discovery(&self) -> Result<DiscoveryReport, RagError> {
        let documents = self.store.list_documents().await?;
        let report = self.discovery.run(&self.store, &documents).await?;
        self.aliases
            .reload(&self.store, self.min_alias_confidence)
            .await?;
        Ok(report)
    }

    /// Remove a document everywhere: rows, chunks, vectors, keyword index
    pub async fn purge(&self, document_id: &str) -> Result<bool, RagError> {
        let existed = self.store.delete_document(document_id).await?;
        self.vector_index
            .delete_by_document(document_id)
            .await
            .map_err(|e| RagError::VectorIndex(e.to_string()))?;
        self.keyword_index.remove_document(document_id)?;
        if existed {
            tracing::info!(document_id, "Document purged");
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::DeterministicEmbedder;
    use crate::vector_index::InMemoryVectorIndex;
    use chrono::Utc;
    use wiki_agent_core::SourceKind;

    fn document(id: &str, text: &str) -> Document {
        Document {
            id: id.to_string(),
            source_url: format!("https://wiki.example.com/{}", id),
            source_kind: SourceKind::Wiki,
            title: format!("Page {}", id),
            text: text.to_string(),
            last_modified: Utc::now(),
            content_hash: Document::hash_content(text),
            tags: vec![],
        }
    }

    async fn build_pipeline() -> (IngestPipeline, Arc<InMemoryVectorIndex>, SqliteStore) {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        let vector_index = Arc::new(InMemoryVectorIndex::new());
        let pipeline = IngestPipeline::new(
            store.clone(),
            Arc::new(DeterministicEmbedder::new(64)),
            vector_index.clone(),
            Arc::new(KeywordIndex::new(None).unwrap()),
            Arc::new(AliasRegistry::new(5)),
            SectionChunker::default(),
            RetrievalSettings::default(),
            0.30,
        );
        (pipeline, vector_index, store)
    }

    #[tokio::test]
    async fn ingesting_twice_is_idempotent() {
        let (pipeline, vector_index, store) = build_pipeline().await;
        let doc = document("d1", "# Deploys\n\nShip through the standard pipeline.");

        let first = pipeline.ingest(&doc).await.unwrap();
        assert!(first.changed);
        assert!(first.chunks > 0);
        let points_after_first = vector_index.len();
        let chunks_after_first = store.chunks_for_document("d1").await.unwrap();

        let second = pipeline.ingest(&doc).await.unwrap();
        assert!(!second.changed);
        assert_eq!(second.chunks, 0);
        assert_eq!(vector_index.len(), points_after_first);

        let chunks_after_second = store.chunks_for_document("d1").await.unwrap();
        assert_eq!(chunks_after_first.len(), chunks_after_second.len());
        for (a, b) in chunks_after_first.iter().zip(&chunks_after_second) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.text, b.text);
        }
    }

    #[tokio::test]
    async fn changed_content_replaces_chunks_and_points() {
        let (pipeline, vector_index, store) = build_pipeline().await;
        pipeline
            .ingest(&document("d1", "Original body text."))
            .await
            .unwrap();
        let report = pipeline
            .ingest(&document("d1", "Entirely new body text."))
            .await
            .unwrap();
        assert!(report.changed);

        let chunks = store.chunks_for_document("d1").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("new body"));
        // Same ordinal means same deterministic point id
        assert_eq!(vector_index.len(), 1);
    }

    #[tokio::test]
    async fn discovery_pass_populates_registry() {
        let (pipeline, _, store) = build_pipeline().await;
        pipeline
            .ingest(&document(
                "d1",
                "The Site Reliability Engineering (SRE) group owns paging.",
            ))
            .await
            .unwrap();

        let report = pipeline.run_alias_discovery().await.unwrap();
        assert_eq!(report.documents_scanned, 1);
        assert!(report.pairs_observed > 0);

        let edges = store.list_alias_edges(false).await.unwrap();
        assert!(edges
            .iter()
            .any(|e| e.term_a == "sre" || e.term_b == "sre"));
    }

    #[tokio::test]
    async fn purge_removes_everything() {
        let (pipeline, vector_index, store) = build_pipeline().await;
        pipeline
            .ingest(&document("d1", "Body of the page."))
            .await
            .unwrap();
        assert!(pipeline.purge("d1").await.unwrap());
        assert!(store.get_document("d1").await.unwrap().is_none());
        assert_eq!(vector_index.len(), 0);
        assert!(!pipeline.purge("d1").await.unwrap());
    }
}
