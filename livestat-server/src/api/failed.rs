use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;

use super::ApiError;
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub(super) struct FailedQuery {
    limit: Option<i64>,
}

/// `GET /api/data/failed?limit` - jobs that exhausted all retry attempts.
///
/// Terminal failures are retained rather than dropped; this surfaces them
/// for operator inspection. Purging is a manual operational decision.
pub(super) async fn list_failed(
    State(state): State<AppState>,
    Query(query): Query<FailedQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let failed = state
        .queue
        .failed_jobs(limit)
        .await
        .map_err(ApiError::Queue)?;

    Ok(Json(failed))
}
