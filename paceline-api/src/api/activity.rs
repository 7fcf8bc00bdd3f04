//! Single activity endpoints

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use paceline_common::model::is_detail_import_eligible;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::store::{activities, details};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ActivityParams {
    #[serde(default)]
    pub include_details: bool,
}

/// GET /api/activity/:id
pub async fn get_activity(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ActivityParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let summary = activities::get_summary(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("activity {id}")))?;

    let mut body = json!({ "ok": true, "activity": summary });
    if params.include_details {
        body["detail"] = match details::get_detail(&state.db, &id).await? {
            Some(detail) => serde_json::to_value(detail)
                .map_err(|e| ApiError::Internal(format!("serialize detail: {e}")))?,
            None => serde_json::Value::Null,
        };
        body["detail_status"] = match details::get_status(&state.db, &id).await? {
            Some(status) => serde_json::to_value(status)
                .map_err(|e| ApiError::Internal(format!("serialize status: {e}")))?,
            None => serde_json::Value::Null,
        };
    }
    Ok(Json(body))
}

/// GET /api/activity/:id/detail
///
/// Serves the cached detail when present. When absent but the activity is
/// eligible, a background ingestion is kicked off and the response is 202;
/// ineligible activities get a definitive 404.
pub async fn get_activity_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    if let Some(detail) = details::get_detail(&state.db, &id).await? {
        let status = details::get_status(&state.db, &id).await?;
        return Ok(Json(json!({
            "ok": true,
            "source": "cache",
            "detail": detail,
            "status": status,
        }))
        .into_response());
    }

    let summary = activities::get_summary(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("activity {id}")))?;

    if !is_detail_import_eligible(&summary.kind, summary.commute) {
        return Err(ApiError::NotFound(format!(
            "details only available for eligible activities (activity {id} is {} commute={:?})",
            summary.kind, summary.commute
        )));
    }

    if !details::is_pending(&state.db, &id).await? {
        details::mark_pending(&state.db, &id).await?;
        let db = state.db.clone();
        let relay = state.relay.clone();
        let activity_id = id.clone();
        tokio::spawn(async move {
            match relay.fetch_detail(&activity_id).await {
                Ok(raw) => match paceline_common::normalize::normalize_detail(&raw) {
                    Ok(detail) => {
                        let stored = async {
                            details::put_detail(&db, &activity_id, &raw, &detail).await?;
                            activities::mark_has_detail(&db, &activity_id).await?;
                            details::mark_ready(&db, &activity_id, 1).await
                        }
                        .await;
                        if let Err(e) = stored {
                            tracing::error!(activity_id = %activity_id, error = %e, "Detail store failed");
                        }
                    }
                    Err(reason) => {
                        let _ = details::mark_error(
                            &db,
                            &activity_id,
                            1,
                            &format!("unusable detail payload: {}", reason.as_str()),
                        )
                        .await;
                    }
                },
                Err(e) => {
                    let _ = details::mark_error(&db, &activity_id, 1, &e.to_string()).await;
                }
            }
        });
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "ok": false,
            "status": "triggered_ingestion",
            "retry_after": 5,
        })),
    )
        .into_response())
}
