//! Webhook event audit log

use paceline_common::{time, Error, Result};
use sqlx::SqlitePool;

/// Fields common to every push event from the provider.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub object_type: String,
    pub object_id: String,
    pub aspect_type: String,
    pub owner_id: i64,
    pub event_time: i64,
}

/// Append a received event with its full payload.
pub async fn insert_event(
    db: &SqlitePool,
    event: &WebhookEvent,
    payload: &serde_json::Value,
) -> Result<()> {
    let payload_json = serde_json::to_string(payload)
        .map_err(|e| Error::Internal(format!("serialize webhook payload: {e}")))?;

    sqlx::query(
        "INSERT INTO webhook_events
            (object_type, object_id, aspect_type, owner_id, event_time, payload, received_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.object_type)
    .bind(&event.object_id)
    .bind(&event.aspect_type)
    .bind(event.owner_id)
    .bind(event.event_time)
    .bind(payload_json)
    .bind(time::now_iso())
    .execute(db)
    .await
    .map_err(|e| Error::Database(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn events_append() {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::store::init_database_pool(&dir.path().join("test.db"))
            .await
            .unwrap();

        let event = WebhookEvent {
            object_type: "activity".to_string(),
            object_id: "15844505624".to_string(),
            aspect_type: "create".to_string(),
            owner_id: 14060676,
            event_time: 1748763000,
        };
        insert_event(&pool, &event, &json!({"aspect_type": "create"}))
            .await
            .unwrap();
        insert_event(&pool, &event, &json!({"aspect_type": "create"}))
            .await
            .unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM webhook_events")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }
}
