//! Vector index implementations
//!
//! Qdrant in production; an in-memory cosine index for tests and local
//! degraded runs. Both store the full chunk payload so retrieval scoring
//! never needs a second lookup.

use async_trait::async_trait;
use parking_lot::RwLock;
use qdrant_client::{
    qdrant::{
        condition::ConditionOneOf, point_id::PointIdOptions, value::Kind, Condition,
        CreateCollectionBuilder, DeletePointsBuilder, Distance, FieldCondition, Filter, Match,
        PointId, PointStruct, ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder,
        VectorParamsBuilder,
    },
    Qdrant,
};
use std::collections::HashMap;
use uuid::Uuid;

use wiki_agent_core::{
    ChunkPayload, Error, IndexFilter, Result, ScrollPage, SearchHit, VectorIndex, VectorPoint,
};

use crate::embeddings::cosine;

/// Qdrant connection configuration
#[derive(Debug, Clone)]
pub struct QdrantIndexConfig {
    pub endpoint: String,
    pub collection: String,
    pub dim: usize,
    pub api_key: Option<String>,
}

impl Default for QdrantIndexConfig {
    fn default() -> Self {
        use wiki_agent_config::constants::{embedding, endpoints};
        Self {
            endpoint: endpoints::QDRANT_DEFAULT.to_string(),
            collection: "wiki_chunks".to_string(),
            dim: embedding::DIM,
            api_key: None,
        }
    }
}

/// Qdrant-backed vector index
pub struct QdrantIndex {
    client: Qdrant,
    config: QdrantIndexConfig,
}

impl QdrantIndex {
    pub async fn connect(config: QdrantIndexConfig) -> Result<Self> {
        let mut builder = Qdrant::from_url(&config.endpoint);
        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }
        let client = builder
            .build()
            .map_err(|e| Error::RetrievalUnavailable(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Create the collection if it does not exist yet
    pub async fn ensure_collection(&self) -> Result<()> {
        let exists = self
            .client
            .collection_exists(&self.config.collection)
            .await
            .map_err(|e| Error::RetrievalUnavailable(e.to_string()))?;

        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.config.collection).vectors_config(
                        VectorParamsBuilder::new(self.config.dim as u64, Distance::Cosine),
                    ),
                )
                .await
                .map_err(|e| Error::RetrievalUnavailable(e.to_string()))?;
            tracing::info!(collection = %self.config.collection, "Created vector collection");
        }
        Ok(())
    }

    fn encode_payload(payload: &ChunkPayload) -> HashMap<String, qdrant_client::qdrant::Value> {
        let mut map: HashMap<String, qdrant_client::qdrant::Value> = HashMap::new();
        // Filterable keys stored flat; the rest rides along as JSON
        map.insert("document_id".to_string(), payload.document_id.clone().into());
        map.insert(
            "source_kind".to_string(),
            payload.source_kind.as_str().to_string().into(),
        );
        map.insert(
            "chunk".to_string(),
            serde_json::to_string(payload).unwrap_or_default().into(),
        );
        map
    }

    fn decode_payload(
        payload: &HashMap<String, qdrant_client::qdrant::Value>,
    ) -> Option<ChunkPayload> {
        let raw = payload.get("chunk")?;
        if let Some(Kind::StringValue(json)) = &raw.kind {
            serde_json::from_str(json).ok()
        } else {
            None
        }
    }

    fn filter_to_qdrant(filter: &IndexFilter) -> Filter {
        let mut conditions = Vec::new();
        if let Some(ref document_id) = filter.document_id {
            conditions.push(field_match("document_id", document_id.clone()));
        }
        if let Some(kind) = filter.source_kind {
            conditions.push(field_match("source_kind", kind.as_str().to_string()));
        }
        Filter {
            must: conditions,
            ..Default::default()
        }
    }

    fn point_id_string(id: &PointId) -> String {
        match &id.point_id_options {
            Some(PointIdOptions::Uuid(u)) => u.clone(),
            Some(PointIdOptions::Num(n)) => n.to_string(),
            None => String::new(),
        }
    }
}

fn field_match(key: &str, value: String) -> Condition {
    Condition {
        condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
            key: key.to_string(),
            r#match: Some(Match {
                match_value: Some(qdrant_client::qdrant::r#match::MatchValue::Keyword(value)),
            }),
            ..Default::default()
        })),
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let qdrant_points: Vec<PointStruct> = points
            .iter()
            .map(|p| {
                PointStruct::new(
                    p.id.to_string(),
                    p.vector.clone(),
                    Self::encode_payload(&p.payload),
                )
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(
                &self.config.collection,
                qdrant_points,
            ))
            .await
            .map_err(|e| Error::RetrievalUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<IndexFilter>,
    ) -> Result<Vec<SearchHit>> {
        let mut builder =
            SearchPointsBuilder::new(&self.config.collection, vector.to_vec(), k as u64)
                .with_payload(true);
        if let Some(ref f) = filter {
            if !f.is_empty() {
                builder = builder.filter(Self::filter_to_qdrant(f));
            }
        }

        let results = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| Error::RetrievalUnavailable(e.to_string()))?;

        Ok(results
            .result
            .into_iter()
            .filter_map(|point| {
                let payload = Self::decode_payload(&point.payload)?;
                let id = point
                    .id
                    .as_ref()
                    .map(Self::point_id_string)
                    .and_then(|s| Uuid::parse_str(&s).ok())?;
                Some(SearchHit {
                    id,
                    score: point.score,
                    payload,
                })
            })
            .collect())
    }

    async fn scroll(
        &self,
        filter: Option<IndexFilter>,
        cursor: Option<String>,
    ) -> Result<ScrollPage> {
        let mut builder = ScrollPointsBuilder::new(&self.config.collection)
            .with_payload(true)
            .with_vectors(true)
            .limit(256);
        if let Some(ref f) = filter {
            if !f.is_empty() {
                builder = builder.filter(Self::filter_to_qdrant(f));
            }
        }
        if let Some(cursor) = cursor {
            builder = builder.offset(PointId::from(cursor));
        }

        let page = self
            .client
            .scroll(builder)
            .await
            .map_err(|e| Error::RetrievalUnavailable(e.to_string()))?;

        let points = page
            .result
            .into_iter()
            .filter_map(|point| {
                let payload = Self::decode_payload(&point.payload)?;
                let id = point
                    .id
                    .as_ref()
                    .map(Self::point_id_string)
                    .and_then(|s| Uuid::parse_str(&s).ok())?;
                let vector = point
                    .vectors
                    .and_then(|v| match v.vectors_options {
                        Some(qdrant_client::qdrant::vectors_output::VectorsOptions::Vector(v)) => {
                            Some(v.data)
                        }
                        _ => None,
                    })
                    .unwrap_or_default();
                Some(VectorPoint {
                    id,
                    vector,
                    payload,
                })
            })
            .collect();

        Ok(ScrollPage {
            points,
            next_cursor: page
                .next_page_offset
                .as_ref()
                .map(Self::point_id_string)
                .filter(|s| !s.is_empty()),
        })
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<()> {
        let filter = Filter {
            must: vec![field_match("document_id", document_id.to_string())],
            ..Default::default()
        };
        self.client
            .delete_points(DeletePointsBuilder::new(&self.config.collection).points(filter))
            .await
            .map_err(|e| Error::RetrievalUnavailable(e.to_string()))?;
        Ok(())
    }
}

/// In-memory cosine index, used by tests and as a degraded local fallback
#[derive(Default)]
pub struct InMemoryVectorIndex {
    points: RwLock<HashMap<Uuid, VectorPoint>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.points.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.read().is_empty()
    }

    fn matches(filter: &Option<IndexFilter>, payload: &ChunkPayload) -> bool {
        match filter {
            None => true,
            Some(f) => {
                f.document_id
                    .as_ref()
                    .map_or(true, |d| d == &payload.document_id)
                    && f.source_kind.map_or(true, |k| k == payload.source_kind)
            }
        }
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()> {
        let mut guard = self.points.write();
        for point in points {
            guard.insert(point.id, point);
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<IndexFilter>,
    ) -> Result<Vec<SearchHit>> {
        let guard = self.points.read();
        let mut hits: Vec<SearchHit> = guard
            .values()
            .filter(|p| Self::matches(&filter, &p.payload))
            .map(|p| SearchHit {
                id: p.id,
                score: cosine(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
        hits.truncate(k);
        Ok(hits)
    }

    async fn scroll(
        &self,
        filter: Option<IndexFilter>,
        _cursor: Option<String>,
    ) -> Result<ScrollPage> {
        let guard = self.points.read();
        let mut points: Vec<VectorPoint> = guard
            .values()
            .filter(|p| Self::matches(&filter, &p.payload))
            .cloned()
            .collect();
        points.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(ScrollPage {
            points,
            next_cursor: None,
        })
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<()> {
        self.points
            .write()
            .retain(|_, p| p.payload.document_id != document_id);
        Ok(())
    }
}
