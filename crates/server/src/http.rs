//! Routes and handlers

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use wiki_agent_core::{AnswerRequest, Document, Frame, SourceKind};

use crate::state::AppState;
use crate::ServerError;

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/answer", post(answer))
        .route("/v1/ingest", post(ingest))
        .route("/v1/documents/:id", delete(purge_document))
        .route("/v1/conversations/:id/messages", get(conversation_messages))
        .route("/v1/conversations/:id/close", post(close_conversation))
        .route("/v1/aliases", get(list_aliases))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_endpoint))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `POST /v1/answer`: run the pipeline, stream NDJSON frames
async fn answer(
    State(state): State<AppState>,
    Json(request): Json<AnswerRequest>,
) -> Result<Response, ServerError> {
    metrics::counter!("wiki_agent_answer_requests_total").increment(1);

    let mut stream = state.orchestrator.answer(request).await?;

    let body_stream = async_stream::stream! {
        while let Some(frame) = stream.next().await {
            let terminal = frame.is_terminal();
            if matches!(frame, Frame::Error { .. }) {
                metrics::counter!("wiki_agent_answer_errors_total").increment(1);
            }
            yield Ok::<Bytes, std::convert::Infallible>(Bytes::from(frame.to_ndjson()));
            if terminal {
                break;
            }
        }
    };

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/x-ndjson")
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
}

/// Ingest request body; the content hash is derived server-side
#[derive(Debug, Deserialize)]
struct IngestBody {
    id: String,
    source_url: String,
    #[serde(default)]
    source_kind: SourceKind,
    title: String,
    text: String,
    last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    changed: bool,
    chunks: usize,
}

/// `POST /v1/ingest`: upsert one document, schedule alias discovery
async fn ingest(
    State(state): State<AppState>,
    Json(body): Json<IngestBody>,
) -> Result<Json<IngestResponse>, ServerError> {
    let document = Document {
        content_hash: Document::hash_content(&body.text),
        id: body.id,
        source_url: body.source_url,
        source_kind: body.source_kind,
        title: body.title,
        text: body.text,
        last_modified: body.last_modified.unwrap_or_else(Utc::now),
        tags: body.tags,
    };

    let report = state
        .ingest
        .ingest(&document)
        .await
        .map_err(wiki_agent_core::Error::from)?;

    if report.changed {
        metrics::counter!("wiki_agent_documents_ingested_total").increment(1);
        // Discovery runs on its own worker, never on the request path
        let pipeline = state.ingest.clone();
        tokio::spawn(async move {
            if let Err(error) = pipeline.run_alias_discovery().await {
                tracing::warn!(%error, "Post-ingest alias discovery failed");
            }
        });
    }

    Ok(Json(IngestResponse {
        changed: report.changed,
        chunks: report.chunks,
    }))
}

/// `DELETE /v1/documents/{id}`: purge a document everywhere
async fn purge_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ServerError> {
    let existed = state
        .ingest
        .purge(&id)
        .await
        .map_err(wiki_agent_core::Error::from)?;
    if existed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

/// `GET /v1/conversations/{id}/messages`: history read-back for the UI
async fn conversation_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ServerError> {
    let messages = state
        .store
        .messages(&id)
        .await
        .map_err(wiki_agent_core::Error::from)?;
    Ok(Json(messages).into_response())
}

/// `POST /v1/conversations/{id}/close`: the "new chat" action
async fn close_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ServerError> {
    state
        .store
        .close_conversation(&id)
        .await
        .map_err(wiki_agent_core::Error::from)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct AliasQuery {
    #[serde(default)]
    min_confidence: Option<f32>,
}

/// `GET /v1/aliases`: audit listing, soft-deleted edges included
async fn list_aliases(
    State(state): State<AppState>,
    Query(query): Query<AliasQuery>,
) -> Result<Response, ServerError> {
    let mut edges = state
        .store
        .list_alias_edges(true)
        .await
        .map_err(wiki_agent_core::Error::from)?;
    if let Some(floor) = query.min_confidence {
        edges.retain(|e| e.confidence >= floor);
    }
    Ok(Json(edges).into_response())
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Readiness: the relational store must answer
async fn readyz(State(state): State<AppState>) -> Response {
    match state.store.document_count().await {
        Ok(documents) => Json(serde_json::json!({
            "status": "ready",
            "documents": documents,
        }))
        .into_response(),
        Err(error) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "unavailable",
                "error": error.to_string(),
            })),
        )
            .into_response(),
    }
}

async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
