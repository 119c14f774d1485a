use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use livestat_core::entities::{Aggregate, DEFAULT_GROUP_KEY};
use serde::Deserialize;

use super::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub(super) struct StatsQuery {
    key: Option<String>,
}

/// `GET /api/data/stats?key=<k>` - current aggregate for a group key.
///
/// Returns a zeroed aggregate for unknown keys without creating a row.
pub(super) async fn get_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let key = query.key.as_deref().unwrap_or(DEFAULT_GROUP_KEY);

    let snapshot = match state.store.get(key).await.map_err(ApiError::Store)? {
        Some(aggregate) => aggregate.snapshot(),
        None => Aggregate::zeroed(key).snapshot(),
    };

    Ok(Json(snapshot))
}
