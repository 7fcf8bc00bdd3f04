//! Provider webhook receiver
//!
//! GET handles the one-time subscription verification handshake; POST
//! receives push events. Events are acknowledged immediately and processed
//! in a background task so the provider never sees a slow response.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::store::events::{self, WebhookEvent};
use crate::{sync, AppState};

#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
}

/// GET /api/webhook
pub async fn verify_webhook(
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // an unconfigured token can never match; probes get the same 403 as a
    // wrong token, never a server error
    let expected = state.config.webhook_verify_token.as_deref();

    if params.mode.as_deref() != Some("subscribe")
        || expected.is_none()
        || params.verify_token.as_deref() != expected
    {
        tracing::warn!(mode = ?params.mode, "Webhook verification rejected");
        return Err(ApiError::Forbidden("verification failed".to_string()));
    }

    let challenge = params
        .challenge
        .ok_or_else(|| ApiError::BadRequest("hub.challenge is required".to_string()))?;
    Ok(Json(json!({ "hub.challenge": challenge })))
}

#[derive(Debug, Deserialize)]
pub struct PushEvent {
    pub object_type: String,
    pub object_id: serde_json::Value,
    pub aspect_type: String,
    pub owner_id: i64,
    #[serde(default)]
    pub event_time: i64,
}

/// POST /api/webhook
pub async fn receive_webhook(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let event: PushEvent = serde_json::from_value(payload.clone())
        .map_err(|e| ApiError::BadRequest(format!("malformed event: {e}")))?;
    let object_id = event.object_id.to_string().trim_matches('"').to_string();

    events::insert_event(
        &state.db,
        &WebhookEvent {
            object_type: event.object_type.clone(),
            object_id: object_id.clone(),
            aspect_type: event.aspect_type.clone(),
            owner_id: event.owner_id,
            event_time: event.event_time,
        },
        &payload,
    )
    .await?;

    tracing::info!(
        object_type = %event.object_type,
        aspect_type = %event.aspect_type,
        object_id = %object_id,
        "Webhook event received"
    );

    // acknowledge first, ingest in the background
    if event.object_type == "activity" && event.aspect_type == "create" {
        let db = state.db.clone();
        let strava = state.strava.clone();
        let owner_id = event.owner_id;
        tokio::spawn(async move {
            let result = async {
                let token = strava.fresh_access_token(&db, owner_id).await?;
                sync::process_activity(&db, &strava, &token, &object_id, owner_id).await
            }
            .await;
            if let Err(e) = result {
                tracing::warn!(activity_id = %object_id, error = %e, "Webhook ingestion failed");
            }
        });
    }

    Ok(Json(json!({ "received": true })))
}
