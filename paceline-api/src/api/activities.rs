//! Paginated activity list endpoint
//!
//! The busiest endpoint: serves a recency page from the cache, refreshing
//! the window from the relay first when asked to (or when the cache is
//! stale), then runs the detail auto-import pool over the page before
//! responding.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use paceline_common::model::{
    ActivitiesListResponse, ActivitiesMeta, DetailPolicy, RefreshPolicy, RefreshReason,
};
use serde::Deserialize;

use crate::detail_import::{self, DetailImportConfig, ImportCounters};
use crate::error::ApiError;
use crate::store::{activities, settings};
use crate::{sync, AppState};

pub const DEFAULT_PAGE_SIZE: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
    pub refresh: Option<String>,
    pub detail: Option<String>,
    #[serde(rename = "type")]
    pub sport_type: Option<String>,
    pub user_id: Option<i64>,
}

/// GET /api/activities
pub async fn list_activities(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let refresh = RefreshPolicy::from_param(params.refresh.as_deref());
    let detail_policy = DetailPolicy::from_param(params.detail.as_deref());
    let limit = activities::clamp_limit(params.limit.unwrap_or(DEFAULT_PAGE_SIZE));

    let stale = sync::is_stale(&state.db, state.config.stale_after_minutes as u64).await?;

    // decide and run the upstream refresh before reading the page index
    let refresh_reason = match refresh {
        RefreshPolicy::Off => RefreshReason::Off,
        RefreshPolicy::Force => {
            // forced refresh must be attempted, but a dead upstream does not
            // stop the cached page from being served
            if let Err(e) = sync::refresh_window(
                &state.db,
                &state.relay,
                state.config.window_days,
                activities::MAX_PAGE_SIZE,
            )
            .await
            {
                tracing::warn!(error = %e, "Forced refresh failed, serving cached data");
            }
            RefreshReason::Force
        }
        RefreshPolicy::Auto if stale => {
            if let Err(e) = sync::refresh_window(
                &state.db,
                &state.relay,
                state.config.window_days,
                activities::MAX_PAGE_SIZE,
            )
            .await
            {
                tracing::warn!(error = %e, "Stale-cache refresh failed");
                let meta = ActivitiesMeta {
                    window_days: state.config.window_days,
                    refreshed_at: settings::get_refreshed_at(&state.db).await?,
                    last_activity_iso: settings::get_last_activity_iso(&state.db).await?,
                    stale,
                    refresh_reason: RefreshReason::AutoDueToStale,
                    detail_policy,
                    detail_enqueued_count: 0,
                    detail_started_count: 0,
                    detail_completed_count: 0,
                    detail_errors_count: 0,
                };
                return Ok((
                    StatusCode::ACCEPTED,
                    response_headers(RefreshReason::AutoDueToStale),
                    Json(serde_json::json!({
                        "ok": false,
                        "status": "refresh_in_progress",
                        "retry_after": 5,
                        "meta": meta,
                    })),
                )
                    .into_response());
            }
            RefreshReason::AutoDueToStale
        }
        RefreshPolicy::Auto => RefreshReason::None,
    };

    let filter = activities::PageFilter {
        user_id: params.user_id,
        sport_type: params.sport_type.clone(),
    };
    let mut page = activities::page(&state.db, limit, params.cursor.as_deref(), &filter).await?;

    let counters = run_detail_import(&state, &page.items, detail_policy).await?;
    if counters.completed > 0 {
        // pick up the has_detail flags the import batch just flipped
        page = activities::page(&state.db, limit, params.cursor.as_deref(), &filter).await?;
    }

    let meta = ActivitiesMeta {
        window_days: state.config.window_days,
        refreshed_at: settings::get_refreshed_at(&state.db).await?,
        last_activity_iso: settings::get_last_activity_iso(&state.db).await?,
        stale,
        refresh_reason,
        detail_policy,
        detail_enqueued_count: counters.enqueued,
        detail_started_count: counters.started,
        detail_completed_count: counters.completed,
        detail_errors_count: counters.errors,
    };

    let body = ActivitiesListResponse {
        ok: true,
        count: page.items.len(),
        next_cursor: page.next_cursor,
        meta,
        items: page.items,
    };

    Ok((response_headers(refresh_reason), Json(body)).into_response())
}

fn response_headers(refresh_reason: RefreshReason) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("x-refresh-reason"),
        HeaderValue::from_static(refresh_reason.as_str()),
    );
    if let Ok(request_id) = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()) {
        headers.insert(HeaderName::from_static("x-request-id"), request_id);
    }
    headers
}

/// Run the detail auto-import pool over one response page.
pub(crate) async fn run_detail_import(
    state: &AppState,
    items: &[paceline_common::model::ActivitySummary],
    policy: DetailPolicy,
) -> Result<ImportCounters, ApiError> {
    let cfg = DetailImportConfig {
        max_concurrency: state.config.detail_max_concurrency,
        call_delay_ms: state.config.detail_call_delay_ms,
        retry_max: state.config.detail_retry_max,
    };
    let relay = state.relay.clone();
    let counters = detail_import::auto_import_details(&state.db, cfg, items, policy, move |id| {
        let relay = relay.clone();
        async move { relay.fetch_detail(&id).await }
    })
    .await?;
    Ok(counters)
}
