//! Item observability routes.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::api::error::ApiResult;
use crate::api::models::{ItemResponse, PendingItemsQuery, PendingMetricsResponse};
use crate::api::server::AppState;

/// Ceiling for the pending listing.
const MAX_PENDING_LIMIT: u32 = 100;

const DEFAULT_PENDING_LIMIT: u32 = 20;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/pending", get(pending_items))
        .route("/metrics", get(pending_metrics))
}

async fn pending_items(
    State(state): State<AppState>,
    Query(query): Query<PendingItemsQuery>,
) -> ApiResult<Json<Vec<ItemResponse>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PENDING_LIMIT)
        .clamp(1, MAX_PENDING_LIMIT);
    let items = state.items.list_pending(limit).await?;
    Ok(Json(items.iter().map(ItemResponse::from).collect()))
}

async fn pending_metrics(State(state): State<AppState>) -> ApiResult<Json<PendingMetricsResponse>> {
    let pending = state.items.count_pending().await?;
    Ok(Json(PendingMetricsResponse { pending }))
}
