//! Admin backfill endpoints
//!
//! Walks the provider's activity history page by page and upserts summaries,
//! retrying transient page failures and stopping cleanly when the provider's
//! rate limit window is exhausted. Progress is persisted so an interrupted
//! run is visible and resumable.

use axum::extract::{Query, State};
use axum::Json;
use paceline_common::{normalize, time};
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::store::{activities, settings};
use crate::AppState;

const BACKFILL_PER_PAGE: u32 = 100;
const DEFAULT_BACKFILL_DAYS: i64 = 365;

#[derive(Debug, Deserialize)]
pub struct BackfillParams {
    pub user_id: Option<i64>,
    pub days: Option<i64>,
}

/// POST /api/admin/backfill
pub async fn post_backfill(
    State(state): State<AppState>,
    Query(params): Query<BackfillParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = params
        .user_id
        .or(state.config.default_user_id)
        .ok_or_else(|| ApiError::BadRequest("user_id is required".to_string()))?;
    let days = params.days.unwrap_or(DEFAULT_BACKFILL_DAYS).clamp(1, 3650);

    let access_token = state.strava.fresh_access_token(&state.db, user_id).await?;
    let after_epoch_s = (chrono::Utc::now() - chrono::Duration::days(days)).timestamp();

    settings::set_setting(&state.db, settings::IMPORT_STATUS, "running").await?;

    let mut page_number = 1u32;
    let mut imported = 0usize;
    let mut skipped = 0usize;
    let mut final_status = "completed";

    'pages: loop {
        let mut attempt = 0u32;
        let (items, rate_limit) = loop {
            match state
                .strava
                .list_activities(&access_token, after_epoch_s, page_number, BACKFILL_PER_PAGE)
                .await
            {
                Ok(result) => break result,
                Err(e) if attempt < state.config.import_max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        page = page_number,
                        attempt,
                        error = %e,
                        "Backfill page fetch failed, retrying"
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(1 << attempt)).await;
                }
                Err(e) => {
                    settings::set_setting(&state.db, settings::IMPORT_STATUS, "failed").await?;
                    return Err(e.into());
                }
            }
        };

        if items.is_empty() {
            break;
        }

        for raw in &items {
            match normalize::normalize_summary(raw) {
                Ok(summary) => {
                    activities::upsert_summary(&state.db, Some(user_id), &summary).await?;
                    imported += 1;
                }
                Err(reason) => {
                    tracing::warn!(
                        reason = reason.as_str(),
                        "Skipping unusable activity during backfill"
                    );
                    skipped += 1;
                }
            }
        }

        settings::set_setting(
            &state.db,
            settings::IMPORT_PROGRESS,
            &json!({
                "pages": page_number,
                "imported": imported,
                "skipped": skipped,
                "updated_at": time::now_iso(),
            })
            .to_string(),
        )
        .await?;

        if rate_limit.short_window_exhausted() {
            tracing::warn!(
                page = page_number,
                "Provider rate limit exhausted, pausing backfill"
            );
            final_status = "rate_limited";
            break 'pages;
        }
        page_number += 1;
    }

    settings::set_setting(&state.db, settings::IMPORT_STATUS, final_status).await?;

    Ok(Json(json!({
        "ok": true,
        "status": final_status,
        "pages": page_number,
        "imported": imported,
        "skipped": skipped,
    })))
}

/// GET /api/admin/import-status
pub async fn get_import_status(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = settings::get_setting(&state.db, settings::IMPORT_STATUS).await?;
    let progress = settings::get_setting(&state.db, settings::IMPORT_PROGRESS)
        .await?
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok());

    Ok(Json(json!({
        "ok": true,
        "status": status.unwrap_or_else(|| "never_run".to_string()),
        "progress": progress,
    })))
}
