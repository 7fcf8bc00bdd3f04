//! HTTP API integration tests
//!
//! Each test builds a router over a temporary database and drives it with
//! `tower::ServiceExt::oneshot`. Upstream-dependent behavior is exercised
//! against a small in-test relay server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use axum::Router;
use http_body_util::BodyExt;
use paceline_api::store::{self, activities, settings, tokens};
use paceline_api::{build_router, AppState};
use paceline_common::model::ActivitySummary;
use paceline_common::{time, Config};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::util::ServiceExt;

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.database_path = dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .into_owned();
    config.webhook_verify_token = Some("verify-me".to_string());
    config.default_user_id = Some(1);
    config.detail_call_delay_ms = 0;
    config
}

async fn state_from(config: Config) -> AppState {
    let pool = store::init_database_pool(std::path::Path::new(&config.database_path))
        .await
        .unwrap();
    AppState::new(pool, config).unwrap()
}

async fn setup_app() -> (TempDir, Router, AppState) {
    let dir = tempfile::tempdir().unwrap();
    let state = state_from(test_config(&dir)).await;
    let app = build_router(state.clone());
    (dir, app, state)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn summary(id: &str, date: &str, kind: &str, commute: Option<bool>) -> ActivitySummary {
    ActivitySummary {
        activity_id: id.to_string(),
        date: date.to_string(),
        kind: kind.to_string(),
        distance_meter: 10000.0,
        time_moving: 3000,
        avg_hr: Some(150.0),
        avg_watts: None,
        elevation: None,
        suffer_score: None,
        charge: None,
        intensity: None,
        commute,
        has_detail: false,
    }
}

async fn serve_on_ephemeral(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Spawn an in-test relay that serves an empty incremental list and counts
/// how many times it is hit.
async fn spawn_relay_stub() -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_inner = Arc::clone(&hits);
    let app = Router::new().route(
        "/list",
        axum::routing::get(move || {
            let hits = Arc::clone(&hits_inner);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                axum::Json(json!([]))
            }
        }),
    );
    (format!("{}/list", serve_on_ephemeral(app).await), hits)
}

/// Spawn an in-test relay serving a fixed incremental list payload.
async fn spawn_relay_json(body: Value) -> String {
    let app = Router::new().route(
        "/list",
        axum::routing::get(move || {
            let body = body.clone();
            async move { axum::Json(body) }
        }),
    );
    format!("{}/list", serve_on_ephemeral(app).await)
}

/// Spawn an in-test provider: a three-item activity list where one id is
/// already cached and one detail fetch always fails.
async fn spawn_provider_stub() -> String {
    let app = Router::new()
        .route(
            "/athlete/activities",
            axum::routing::get(|| async {
                axum::Json(json!([{"id": 1}, {"id": 2}, {"id": 3}]))
            }),
        )
        .route(
            "/activities/:id",
            axum::routing::get(|axum::extract::Path(id): axum::extract::Path<String>| async move {
                if id == "3" {
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        axum::Json(json!({"message": "boom"})),
                    )
                        .into_response()
                } else {
                    axum::Json(json!({
                        "id": 2,
                        "start_date": "2025-06-10T07:00:00Z",
                        "type": "Run",
                        "distance": 8000.0,
                        "moving_time": 2400,
                        "average_heartrate": 150.0,
                        "average_speed": 3.2,
                        "commute": false
                    }))
                    .into_response()
                }
            }),
        );
    serve_on_ephemeral(app).await
}

/// Spawn an in-test provider whose first list call fails and whose second
/// answers with an exhausted short rate limit window.
async fn spawn_backfill_provider(hits: Arc<AtomicUsize>) -> String {
    let app = Router::new().route(
        "/athlete/activities",
        axum::routing::get(move || {
            let hits = Arc::clone(&hits);
            async move {
                if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                    (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response()
                } else {
                    (
                        [
                            ("x-ratelimit-limit", "100,1000"),
                            ("x-ratelimit-usage", "100,42"),
                        ],
                        axum::Json(json!([{
                            "id": 900,
                            "start_date": "2025-06-01T07:00:00Z",
                            "type": "Ride",
                            "distance": 20000.0,
                            "moving_time": 3600,
                            "commute": false
                        }])),
                    )
                        .into_response()
                }
            }
        }),
    );
    serve_on_ephemeral(app).await
}

async fn seed_token(db: &sqlx::SqlitePool, user_id: i64) {
    tokens::put_token(
        db,
        user_id,
        &tokens::TokenSet {
            access_token: "acc".to_string(),
            refresh_token: "ref".to_string(),
            expires_at: chrono::Utc::now().timestamp() + 86_400,
            token_type: "Bearer".to_string(),
        },
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn health_reports_service() {
    let (_dir, app, _state) = setup_app().await;
    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "paceline-api");
}

#[tokio::test]
async fn empty_list_with_refresh_off() {
    let (_dir, app, _state) = setup_app().await;
    let (status, body) = get(&app, "/api/activities?refresh=off&detail=off").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["count"], 0);
    assert_eq!(body["meta"]["refresh_reason"], "off");
    assert!(body["next_cursor"].is_null());
}

#[tokio::test]
async fn list_paginates_with_cursor() {
    let (_dir, app, state) = setup_app().await;
    for (id, date) in [
        ("a", "2025-06-01T07:00:00.000Z"),
        ("b", "2025-06-02T07:00:00.000Z"),
        ("c", "2025-06-03T07:00:00.000Z"),
    ] {
        activities::upsert_summary(&state.db, None, &summary(id, date, "Run", Some(true)))
            .await
            .unwrap();
    }

    let (status, body) = get(&app, "/api/activities?refresh=off&detail=off&limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["items"][0]["activity_id"], "c");
    assert_eq!(body["items"][1]["activity_id"], "b");

    let cursor = body["next_cursor"].as_str().unwrap();
    let (status, body) = get(
        &app,
        &format!("/api/activities?refresh=off&detail=off&limit=2&cursor={cursor}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["items"][0]["activity_id"], "a");
    assert!(body["next_cursor"].is_null());
}

#[tokio::test]
async fn malformed_cursor_is_rejected() {
    let (_dir, app, _state) = setup_app().await;
    let (status, body) = get(&app, "/api/activities?refresh=off&cursor=garbage").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn list_filters_by_type() {
    let (_dir, app, state) = setup_app().await;
    activities::upsert_summary(
        &state.db,
        None,
        &summary("a", "2025-06-01T07:00:00.000Z", "Run", Some(true)),
    )
    .await
    .unwrap();
    activities::upsert_summary(
        &state.db,
        None,
        &summary("b", "2025-06-02T07:00:00.000Z", "Ride", Some(true)),
    )
    .await
    .unwrap();

    let (status, body) = get(&app, "/api/activities?refresh=off&detail=off&type=Ride").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["items"][0]["type"], "Ride");
}

#[tokio::test]
async fn single_activity_found_and_missing() {
    let (_dir, app, state) = setup_app().await;
    let (status, body) = get(&app, "/api/activity/9").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    activities::upsert_summary(
        &state.db,
        None,
        &summary("9", "2025-06-01T07:00:00.000Z", "Run", Some(false)),
    )
    .await
    .unwrap();
    let (status, body) = get(&app, "/api/activity/9?include_details=true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["activity"]["activity_id"], "9");
    assert!(body["detail"].is_null());
}

#[tokio::test]
async fn detail_endpoint_rejects_ineligible_activities() {
    let (_dir, app, state) = setup_app().await;
    activities::upsert_summary(
        &state.db,
        None,
        &summary("w", "2025-06-01T07:00:00.000Z", "Walk", Some(false)),
    )
    .await
    .unwrap();

    let (status, body) = get(&app, "/api/activity/w/detail").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("eligible"));
}

#[tokio::test]
async fn detail_endpoint_triggers_ingestion_for_eligible() {
    let (_dir, app, state) = setup_app().await;
    activities::upsert_summary(
        &state.db,
        None,
        &summary("r", "2025-06-01T07:00:00.000Z", "Run", Some(false)),
    )
    .await
    .unwrap();

    let (status, body) = get(&app, "/api/activity/r/detail").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "triggered_ingestion");
}

#[tokio::test]
async fn webhook_verification_handshake() {
    let (_dir, app, _state) = setup_app().await;

    let (status, body) = get(
        &app,
        "/api/webhook?hub.mode=subscribe&hub.challenge=abc123&hub.verify_token=verify-me",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hub.challenge"], "abc123");

    let (status, _) = get(
        &app,
        "/api/webhook?hub.mode=subscribe&hub.challenge=abc123&hub.verify_token=wrong",
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn webhook_event_is_acknowledged_and_stored() {
    let (_dir, app, state) = setup_app().await;
    let (status, body) = post_json(
        &app,
        "/api/webhook",
        json!({
            "object_type": "activity",
            "object_id": 15844505624u64,
            "aspect_type": "update",
            "owner_id": 7,
            "event_time": 1748763000
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM webhook_events")
        .fetch_one(&state.db)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn sync_without_tokens_is_not_found() {
    let (_dir, app, _state) = setup_app().await;
    let (status, body) = post_json(&app, "/api/sync?user_id=42", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn gpt_feed_serves_cache_without_sync() {
    let (_dir, app, state) = setup_app().await;
    let recent = time::days_ago_iso(2);
    activities::upsert_summary(&state.db, None, &summary("g", &recent, "Run", Some(false)))
        .await
        .unwrap();
    // outside the window
    activities::upsert_summary(
        &state.db,
        None,
        &summary("old", "2024-01-01T07:00:00.000Z", "Run", Some(false)),
    )
    .await
    .unwrap();

    let (status, body) = get(&app, "/api/gpt/activities?user_id=1&auto_sync=false&days=7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["synced"], false);
    assert_eq!(body["period"]["days"], 7);
    assert_eq!(body["stats"]["count"], 1);
    assert_eq!(body["stats"]["types"], json!(["Run"]));
    assert_eq!(body["items"][0]["activity_id"], "g");
    assert_eq!(body["items"][0]["distance_km"], 10.0);
}

#[tokio::test]
async fn import_status_before_any_backfill() {
    let (_dir, app, _state) = setup_app().await;
    let (status, body) = get(&app, "/api/admin/import-status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "never_run");
    assert!(body["progress"].is_null());
}

#[tokio::test]
async fn force_refresh_always_hits_the_relay() {
    let dir = tempfile::tempdir().unwrap();
    let (relay_url, hits) = spawn_relay_stub().await;
    let mut config = test_config(&dir);
    config.relay_list_url = Some(relay_url);
    let state = state_from(config).await;

    // cache is fresh: watermark and stamp are both current
    settings::set_last_activity_iso(&state.db, &time::now_iso())
        .await
        .unwrap();
    settings::set_refreshed_at(&state.db, &time::now_iso())
        .await
        .unwrap();

    let app = build_router(state);
    let (status, body) = get(&app, "/api/activities?refresh=force&detail=off").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["refresh_reason"], "force");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn refresh_off_never_hits_the_relay() {
    let dir = tempfile::tempdir().unwrap();
    let (relay_url, hits) = spawn_relay_stub().await;
    let mut config = test_config(&dir);
    config.relay_list_url = Some(relay_url);
    let state = state_from(config).await;
    let app = build_router(state);

    // cold cache would normally trigger an auto refresh
    let (status, _) = get(&app, "/api/activities?refresh=off&detail=off").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn auto_refresh_only_when_stale() {
    let dir = tempfile::tempdir().unwrap();
    let (relay_url, hits) = spawn_relay_stub().await;
    let mut config = test_config(&dir);
    config.relay_list_url = Some(relay_url);
    let state = state_from(config).await;
    let app = build_router(state.clone());

    // cold cache: stale, so auto refreshes
    let (status, body) = get(&app, "/api/activities?detail=off").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["refresh_reason"], "auto_due_to_stale");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // the refresh stamped the cache but no activity was ever seen, so seed
    // the watermark to make it genuinely fresh
    settings::set_last_activity_iso(&state.db, &time::now_iso())
        .await
        .unwrap();

    let (status, body) = get(&app, "/api/activities?detail=off").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["refresh_reason"], "none");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn force_refresh_ingests_relay_items() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.relay_list_url = Some(
        spawn_relay_json(json!([{
            "activity_id": "501",
            "date": "2025-06-07T09:00:00Z",
            "type": "Run",
            "distance_meter": 12000,
            "time_moving": 3600,
            "commute": false
        }]))
        .await,
    );
    let state = state_from(config).await;
    let app = build_router(state);

    let (status, body) = get(&app, "/api/activities?refresh=force&detail=off").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["items"][0]["activity_id"], "501");
    assert_eq!(body["meta"]["last_activity_iso"], "2025-06-07T09:00:00.000Z");
}

#[tokio::test]
async fn sync_ingests_new_and_collects_errors() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.strava_base_url = spawn_provider_stub().await;
    let state = state_from(config).await;
    seed_token(&state.db, 1).await;
    // id 1 is already cached and must be skipped
    activities::upsert_summary(
        &state.db,
        Some(1),
        &summary("1", "2025-06-01T07:00:00.000Z", "Run", Some(false)),
    )
    .await
    .unwrap();
    let app = build_router(state.clone());

    let (status, body) = post_json(&app, "/api/sync?user_id=1", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let report = &body["report"];
    assert_eq!(report["total_checked"], 3);
    assert_eq!(report["new_found"], 2);
    assert_eq!(report["processed"], 1);
    assert_eq!(report["errors"], 1);
    assert_eq!(report["last_sync_after"], "2025-06-10T07:00:00.000Z");

    // the processed activity arrived with everything needed for its detail
    let stored = activities::get_summary(&state.db, "2").await.unwrap().unwrap();
    assert!(stored.has_detail);
    assert!(activities::get_summary(&state.db, "3")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn backfill_retries_pages_and_stops_on_rate_limit() {
    let dir = tempfile::tempdir().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let mut config = test_config(&dir);
    config.strava_base_url = spawn_backfill_provider(Arc::clone(&hits)).await;
    let state = state_from(config).await;
    seed_token(&state.db, 1).await;
    let app = build_router(state.clone());

    let (status, body) = post_json(&app, "/api/admin/backfill?user_id=1&days=30", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "rate_limited");
    assert_eq!(body["imported"], 1);
    assert_eq!(body["pages"], 1);
    // first page attempt failed and was retried
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert!(activities::get_summary(&state.db, "900")
        .await
        .unwrap()
        .is_some());

    let (status, body) = get(&app, "/api/admin/import-status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "rate_limited");
    assert_eq!(body["progress"]["imported"], 1);
}

#[tokio::test]
async fn webhook_verification_without_configured_token_is_forbidden() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.webhook_verify_token = None;
    let state = state_from(config).await;
    let app = build_router(state);

    let (status, body) = get(
        &app,
        "/api/webhook?hub.mode=subscribe&hub.challenge=abc123&hub.verify_token=anything",
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");
}

#[tokio::test]
async fn failed_auto_refresh_returns_accepted() {
    // cold cache, no relay configured: the auto refresh cannot run
    let (_dir, app, _state) = setup_app().await;
    let (status, body) = get(&app, "/api/activities?detail=off").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["ok"], false);
    assert_eq!(body["status"], "refresh_in_progress");
    assert_eq!(body["meta"]["refresh_reason"], "auto_due_to_stale");
}

#[tokio::test]
async fn webhook_create_ingests_in_background() {
    // token refresh will fail against the unreachable provider, which is
    // fine: the event must still be acknowledged immediately
    let (_dir, app, state) = setup_app().await;
    tokens::put_token(
        &state.db,
        7,
        &tokens::TokenSet {
            access_token: "acc".to_string(),
            refresh_token: "ref".to_string(),
            expires_at: 0,
            token_type: "Bearer".to_string(),
        },
    )
    .await
    .unwrap();

    let (status, body) = post_json(
        &app,
        "/api/webhook",
        json!({
            "object_type": "activity",
            "object_id": "555",
            "aspect_type": "create",
            "owner_id": 7,
            "event_time": 1748763000
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
}
