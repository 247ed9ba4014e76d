use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::instrument;

use super::dto::{EntriesResponse, EntryResponse, SyncOperation};
use super::service;
use crate::auth::extractors::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

pub fn budget_routes() -> Router<AppState> {
    Router::new()
        .route("/sync", post(sync))
        .route("/entries", get(list_entries))
}

/// Accepts a single operation from the client's offline queue. Safe under
/// at-least-once delivery; replays converge.
#[instrument(skip_all)]
async fn sync(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(op): Json<SyncOperation>,
) -> Result<Json<serde_json::Value>, ApiError> {
    service::apply_operation(state.store.as_ref(), user_id, op).await?;
    Ok(Json(json!({ "success": true })))
}

/// Authoritative snapshot of the caller's non-deleted entries, ordered by
/// creation instant. The frontend pulls this after draining its queue.
#[instrument(skip_all)]
async fn list_entries(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<EntriesResponse>, ApiError> {
    let entries = state
        .store
        .list_entries(user_id)
        .await?
        .into_iter()
        .map(|e| EntryResponse {
            id: e.id,
            amount: e.amount,
            description: e.description,
            kind: e.kind,
            created_at: e.created_at,
        })
        .collect();
    Ok(Json(EntriesResponse { entries }))
}
