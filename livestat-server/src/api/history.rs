use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use livestat_core::entities::ProcessedRecord;
use livestat_core::store::HistoryFilter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use super::ApiError;
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize)]
pub(super) struct HistoryQuery {
    page: Option<i64>,
    limit: Option<i64>,
    /// Unix timestamp (seconds), inclusive lower bound on `processed_at`.
    from: Option<i64>,
    /// Unix timestamp (seconds), inclusive upper bound on `processed_at`.
    to: Option<i64>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    page: i64,
    limit: i64,
    total: i64,
    total_pages: i64,
    data: Vec<ProcessedRecordResponse>,
}

/// Wire form of a [`ProcessedRecord`].
#[derive(Debug, Serialize)]
struct ProcessedRecordResponse {
    id: i64,
    value: f64,
    original: Value,
    processed_at: i64,
}

impl From<ProcessedRecord> for ProcessedRecordResponse {
    fn from(record: ProcessedRecord) -> Self {
        Self {
            id: record.id,
            value: record.value,
            original: record.original,
            processed_at: record.processed_at.unix_timestamp(),
        }
    }
}

/// `GET /api/data/history?page&limit&from&to` - paginated processed-record
/// listing, newest first, filtered by processing time.
pub(super) async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    // Saturating: an absurd page is an empty page, not an overflow.
    let offset = page.saturating_sub(1).saturating_mul(limit);

    let from = query
        .from
        .map(OffsetDateTime::from_unix_timestamp)
        .transpose()
        .map_err(|_| ApiError::Validation("invalid 'from' timestamp"))?;
    let to = query
        .to
        .map(OffsetDateTime::from_unix_timestamp)
        .transpose()
        .map_err(|_| ApiError::Validation("invalid 'to' timestamp"))?;

    let result = state
        .records
        .list_processed(HistoryFilter {
            from,
            to,
            limit,
            offset,
        })
        .await
        .map_err(ApiError::Store)?;

    Ok(Json(HistoryResponse {
        page,
        limit,
        total: result.total,
        total_pages: (result.total + limit - 1) / limit,
        data: result.records.into_iter().map(Into::into).collect(),
    }))
}
