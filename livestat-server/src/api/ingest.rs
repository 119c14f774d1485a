use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use livestat_core::entities::{DEFAULT_GROUP_KEY, IngestItem, NewJob};
use serde::Serialize;
use serde_json::Value;

use super::ApiError;
use crate::state::AppState;

/// Acceptance acknowledgment: the batch is durably queued, not processed.
#[derive(Debug, Serialize)]
struct IngestAck {
    accepted: u64,
}

/// `POST /api/data/ingest` - accept a batch of items for async processing.
///
/// The body is validated structurally (`items` present, a non-empty array,
/// under the configured ceiling); per-item numeric validation is the
/// worker's job so malformed values go through the retry path. The whole
/// batch is enqueued in one all-or-nothing operation and the response is
/// sent before any processing happens.
///
/// Group-key precedence is deliberate: a per-item `key` wins over the
/// request-level `key`, which only acts as the batch default. One request
/// can therefore carry items for several keys; a batch-level key never
/// silently overrides an item's own.
pub(super) async fn ingest(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(items) = body.get("items") else {
        return Err(ApiError::Validation("items must be a non-empty array"));
    };
    let Some(items) = items.as_array() else {
        return Err(ApiError::Validation("items must be a non-empty array"));
    };
    if items.is_empty() {
        return Err(ApiError::Validation("items must be a non-empty array"));
    }
    if items.len() > state.max_batch {
        return Err(ApiError::Validation(
            "batch exceeds the configured size ceiling",
        ));
    }

    let request_key = body.get("key").and_then(Value::as_str);

    let mut jobs = Vec::with_capacity(items.len());
    for raw in items {
        let item: IngestItem = serde_json::from_value(raw.clone())
            .map_err(|_| ApiError::Validation("items must be objects"))?;

        // The group key is resolved exactly once, here: per-item key, then
        // the request-level key, then the default.
        let group_key = item
            .key
            .clone()
            .or_else(|| request_key.map(str::to_owned))
            .unwrap_or_else(|| DEFAULT_GROUP_KEY.to_owned());

        jobs.push(NewJob {
            group_key,
            payload: item,
        });
    }

    let accepted = state
        .queue
        .enqueue_batch(jobs)
        .await
        .map_err(ApiError::Queue)?;

    // Respond immediately - ingestion is asynchronous.
    Ok((StatusCode::ACCEPTED, Json(IngestAck { accepted })))
}
