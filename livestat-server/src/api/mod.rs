//! Data API handlers.
//!
//! # Endpoints
//!
//! - `POST /api/data/ingest`  - accept a batch of items for async processing
//! - `GET  /api/data/stats`   - current aggregate for a group key
//! - `GET  /api/data/history` - paginated processed-record listing
//! - `GET  /api/data/failed`  - terminally failed jobs, for inspection
//! - `GET  /api/data/ws`      - WebSocket stats update stream

use axum::{
    Json, Router,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use livestat_core::queue::QueueError;
use livestat_core::store::StoreError;
use serde::Serialize;

use crate::state::AppState;

mod failed;
mod history;
mod ingest;
mod stats;
mod ws;

/// Build the Data API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ingest", post(ingest::ingest))
        .route("/stats", get(stats::get_stats))
        .route("/history", get(history::get_history))
        .route("/failed", get(failed::list_failed))
        .route("/ws", get(ws::stats_ws))
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

/// Errors that can occur in Data API handlers.
///
/// Validation failures surface as 400s; backend failures are logged and
/// collapse to an opaque 500. Asynchronous processing failures never
/// appear here - the gateway acks before processing starts.
#[derive(Debug)]
enum ApiError {
    /// The request shape is invalid.
    Validation(&'static str),
    /// A queue operation failed.
    Queue(QueueError),
    /// A storage operation failed.
    Store(StoreError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ApiError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    error: msg.to_owned(),
                }),
            )
                .into_response(),
            ApiError::Queue(e) => {
                tracing::error!(error = %e, "Data API queue error");
                internal_error()
            }
            ApiError::Store(e) => {
                tracing::error!(error = %e, "Data API storage error");
                internal_error()
            }
        }
    }
}

fn internal_error() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: "internal server error".to_owned(),
        }),
    )
        .into_response()
}
