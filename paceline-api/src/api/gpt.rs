//! Assistant-facing activity feed
//!
//! Compact recency feed for the GPT assistant: best-effort provider sync,
//! then a windowed slice of the cache with rounded, prompt-friendly numbers.

use axum::extract::{Query, State};
use axum::Json;
use paceline_common::time;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::store::activities;
use crate::{sync, AppState};

const DEFAULT_WINDOW_DAYS: i64 = 28;
const FEED_FETCH_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct GptParams {
    pub user_id: Option<i64>,
    pub days: Option<i64>,
    pub auto_sync: Option<bool>,
}

/// GET /api/gpt/activities
pub async fn get_gpt_activities(
    State(state): State<AppState>,
    Query(params): Query<GptParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = params
        .user_id
        .or(state.config.default_user_id)
        .ok_or_else(|| ApiError::BadRequest("user_id is required".to_string()))?;
    let days = params.days.unwrap_or(DEFAULT_WINDOW_DAYS).clamp(1, 365);

    // best effort: a failed sync must not break the feed
    let mut synced = false;
    if params.auto_sync.unwrap_or(true) {
        match sync::smart_sync(&state.db, &state.strava, user_id, state.config.first_sync_days)
            .await
        {
            Ok(report) => {
                synced = true;
                tracing::debug!(processed = report.processed, "Assistant feed pre-sync done");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Assistant feed pre-sync failed, serving cache");
            }
        }
    }

    let cutoff = time::days_ago_iso(days);
    let page = activities::page(
        &state.db,
        FEED_FETCH_LIMIT,
        None,
        &activities::PageFilter::default(),
    )
    .await?;

    let recent: Vec<_> = page
        .items
        .into_iter()
        .filter(|s| s.date >= cutoff)
        .collect();

    let total_distance_m: f64 = recent.iter().map(|s| s.distance_meter).sum();
    let total_moving_s: i64 = recent.iter().map(|s| s.time_moving).sum();
    let mut kinds: Vec<&str> = recent.iter().map(|s| s.kind.as_str()).collect();
    kinds.sort_unstable();
    kinds.dedup();
    let weeks = (days as f64 / 7.0).max(1.0);
    let per_week = (recent.len() as f64 / weeks * 10.0).round() / 10.0;

    let items: Vec<serde_json::Value> = recent
        .iter()
        .map(|s| {
            json!({
                "activity_id": s.activity_id,
                "date": s.date,
                "type": s.kind,
                "distance_km": (s.distance_meter / 100.0).round() / 10.0,
                "duration_min": s.time_moving / 60,
                "avg_hr": s.avg_hr,
                "avg_watts": s.avg_watts,
                "suffer_score": s.suffer_score,
                "charge": s.charge,
                "intensity": s.intensity,
                "commute": s.commute,
                "has_detail": s.has_detail,
            })
        })
        .collect();

    Ok(Json(json!({
        "ok": true,
        "user_id": user_id,
        "synced": synced,
        "period": {
            "days": days,
            "from": cutoff,
            "to": time::now_iso(),
        },
        "stats": {
            "count": items.len(),
            "total_distance_km": (total_distance_m / 100.0).round() / 10.0,
            "total_duration_min": total_moving_s / 60,
            "types": kinds,
            "per_week": per_week,
        },
        "items": items,
    })))
}
