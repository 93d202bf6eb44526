//! HTTP gateway
//!
//! Thin transport over the core: `POST /v1/answer` streams NDJSON frames,
//! ingest and maintenance endpoints wrap the pipeline, health and metrics
//! serve operations. All behavior lives in the inner crates.

mod http;
mod state;
mod workers;

pub use http::create_router;
pub use state::AppState;
pub use workers::spawn_background_workers;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use wiki_agent_core::{Error, Frame};

/// Error wrapper mapping core errors onto HTTP statuses
pub struct ServerError(pub Error);

impl From<Error> for ServerError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        use wiki_agent_core::ErrorCode::*;
        let status = match self.0.code() {
            BadRequest => StatusCode::BAD_REQUEST,
            Unauthorized => StatusCode::UNAUTHORIZED,
            ConversationBusy => StatusCode::CONFLICT,
            RateLimited => StatusCode::TOO_MANY_REQUESTS,
            RetrievalUnavailable | EmbeddingError | LLMUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // The body is a single error frame so stream and non-stream
        // clients parse failures the same way
        let frame = Frame::Error {
            code: self.0.code(),
            message: self.0.to_string(),
        };
        (status, frame.to_ndjson()).into_response()
    }
}
