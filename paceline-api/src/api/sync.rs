//! Manual provider sync endpoint

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::{sync, AppState};

#[derive(Debug, Deserialize)]
pub struct SyncParams {
    pub user_id: Option<i64>,
}

/// POST /api/sync
pub async fn post_sync(
    State(state): State<AppState>,
    Query(params): Query<SyncParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = params
        .user_id
        .or(state.config.default_user_id)
        .ok_or_else(|| ApiError::BadRequest("user_id is required".to_string()))?;

    let report =
        sync::smart_sync(&state.db, &state.strava, user_id, state.config.first_sync_days).await?;

    Ok(Json(json!({ "ok": true, "report": report })))
}
