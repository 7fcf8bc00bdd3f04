//! Per-user activity listing

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::store::{activities, details};
use crate::AppState;

const DEFAULT_USER_PAGE: i64 = 10;

#[derive(Debug, Deserialize)]
pub struct UserActivitiesParams {
    pub limit: Option<i64>,
    #[serde(rename = "type")]
    pub sport_type: Option<String>,
    #[serde(default)]
    pub include_details: bool,
}

/// GET /api/users/:user_id/activities
pub async fn get_user_activities(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(params): Query<UserActivitiesParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = activities::clamp_limit(params.limit.unwrap_or(DEFAULT_USER_PAGE));

    let filter = activities::PageFilter {
        user_id: Some(user_id),
        sport_type: params.sport_type.clone(),
    };
    let page = activities::page(&state.db, limit, None, &filter).await?;

    let mut items = Vec::with_capacity(page.items.len());
    for summary in page.items {
        let mut entry = serde_json::to_value(&summary)
            .map_err(|e| ApiError::Internal(format!("serialize summary: {e}")))?;
        if params.include_details && summary.has_detail {
            if let Some(detail) = details::get_detail(&state.db, &summary.activity_id).await? {
                entry["detail"] = serde_json::to_value(detail)
                    .map_err(|e| ApiError::Internal(format!("serialize detail: {e}")))?;
            }
        }
        items.push(entry);
    }

    Ok(Json(json!({
        "ok": true,
        "user_id": user_id,
        "count": items.len(),
        "items": items,
    })))
}
