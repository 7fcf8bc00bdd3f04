//! paceline-api: activity cache and sync service
//!
//! HTTP backend between fitness UIs (and a GPT assistant) and two upstreams:
//! the tracking provider's REST API and a webhook-automation relay. Activity
//! summaries and enriched details are cached in SQLite; list requests keep
//! the cache fresh and trigger bounded background detail imports.

pub mod api;
pub mod clients;
pub mod detail_import;
pub mod error;
pub mod store;
pub mod sync;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use paceline_common::Config;
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::clients::{RelayClient, StravaClient};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<Config>,
    pub strava: Arc<StravaClient>,
    pub relay: Arc<RelayClient>,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: Config) -> paceline_common::Result<Self> {
        let strava = StravaClient::new(
            &config.strava_base_url,
            &config.strava_token_url,
            config.strava_client_id.as_deref().unwrap_or_default(),
            config.strava_client_secret.as_deref().unwrap_or_default(),
        )?;
        let relay = RelayClient::new(
            config.relay_list_url.clone(),
            config.relay_detail_url.clone(),
            config.detail_call_timeout_ms,
        )?;
        Ok(Self {
            db,
            config: Arc::new(config),
            strava: Arc::new(strava),
            relay: Arc::new(relay),
            startup_time: chrono::Utc::now(),
        })
    }
}

/// Build the HTTP router with all endpoints.
pub fn build_router(state: AppState) -> Router {
    // the GPT routes are called cross-origin from the assistant runtime
    let gpt_routes = Router::new()
        .route("/api/gpt/activities", get(api::gpt::get_gpt_activities))
        .layer(CorsLayer::permissive());

    Router::new()
        .route("/health", get(api::health::health_check))
        .route("/api/activities", get(api::activities::list_activities))
        .route("/api/activity/:id", get(api::activity::get_activity))
        .route("/api/activity/:id/detail", get(api::activity::get_activity_detail))
        .route(
            "/api/users/:user_id/activities",
            get(api::users::get_user_activities),
        )
        .route("/api/sync", post(api::sync::post_sync))
        .route(
            "/api/webhook",
            get(api::webhook::verify_webhook).post(api::webhook::receive_webhook),
        )
        .route("/api/admin/backfill", post(api::admin::post_backfill))
        .route("/api/admin/import-status", get(api::admin::get_import_status))
        .merge(gpt_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
