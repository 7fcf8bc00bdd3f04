//! Detail payload storage and the per-activity ingestion status machine
//!
//! Raw and normalized detail payloads are kept side by side; the status row
//! doubles as the in-flight mark, so "already pending" checks and the
//! pending → ready | error transitions live in one place.

use paceline_common::model::{ActivityDetail, DetailState, DetailStatus};
use paceline_common::{time, Error, Result};
use sqlx::SqlitePool;

/// Store the raw and normalized payloads for one activity.
pub async fn put_detail(
    db: &SqlitePool,
    activity_id: &str,
    raw: &serde_json::Value,
    detail: &ActivityDetail,
) -> Result<()> {
    let mut detail = detail.clone();
    detail.raw_ref = Some(format!("activity_details:{activity_id}:raw"));

    let raw_json = serde_json::to_string(raw)
        .map_err(|e| Error::Internal(format!("serialize raw detail: {e}")))?;
    let detail_json = serde_json::to_string(&detail)
        .map_err(|e| Error::Internal(format!("serialize detail: {e}")))?;

    sqlx::query(
        "INSERT INTO activity_details (activity_id, raw, detail, fetched_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(activity_id) DO UPDATE SET
            raw = excluded.raw,
            detail = excluded.detail,
            fetched_at = excluded.fetched_at",
    )
    .bind(activity_id)
    .bind(raw_json)
    .bind(detail_json)
    .bind(time::now_iso())
    .execute(db)
    .await
    .map_err(|e| Error::Database(e.to_string()))?;
    Ok(())
}

/// Fetch the normalized detail for one activity.
pub async fn get_detail(db: &SqlitePool, activity_id: &str) -> Result<Option<ActivityDetail>> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT detail FROM activity_details WHERE activity_id = ?")
            .bind(activity_id)
            .fetch_optional(db)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
    match row {
        Some((json,)) => {
            let detail = serde_json::from_str(&json)
                .map_err(|e| Error::Internal(format!("corrupt detail blob: {e}")))?;
            Ok(Some(detail))
        }
        None => Ok(None),
    }
}

/// True when the detail cache holds this activity.
pub async fn has_detail(db: &SqlitePool, activity_id: &str) -> Result<bool> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM activity_details WHERE activity_id = ?")
            .bind(activity_id)
            .fetch_optional(db)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
    Ok(row.is_some())
}

/// Fetch the ingestion status for one activity.
pub async fn get_status(db: &SqlitePool, activity_id: &str) -> Result<Option<DetailStatus>> {
    let row: Option<(String, Option<String>, Option<String>, Option<String>, i64, Option<String>)> =
        sqlx::query_as(
            "SELECT state, requested_at, last_success_at, last_error_at, attempts, last_error
             FROM detail_status WHERE activity_id = ?",
        )
        .bind(activity_id)
        .fetch_optional(db)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

    let Some((state, requested_at, last_success_at, last_error_at, attempts, last_error)) = row
    else {
        return Ok(None);
    };
    let state = DetailState::parse(&state)
        .ok_or_else(|| Error::Internal(format!("corrupt detail state: {state}")))?;
    Ok(Some(DetailStatus {
        state,
        requested_at,
        last_success_at,
        last_error_at,
        attempts: attempts.max(0) as u32,
        last_error,
    }))
}

/// True when an import for this activity is already in flight.
pub async fn is_pending(db: &SqlitePool, activity_id: &str) -> Result<bool> {
    Ok(matches!(
        get_status(db, activity_id).await?,
        Some(DetailStatus {
            state: DetailState::Pending,
            ..
        })
    ))
}

/// Mark an activity's detail import as in flight.
pub async fn mark_pending(db: &SqlitePool, activity_id: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO detail_status (activity_id, state, requested_at, attempts)
         VALUES (?, 'pending', ?, 0)
         ON CONFLICT(activity_id) DO UPDATE SET
            state = 'pending',
            requested_at = excluded.requested_at",
    )
    .bind(activity_id)
    .bind(time::now_iso())
    .execute(db)
    .await
    .map_err(|e| Error::Database(e.to_string()))?;
    Ok(())
}

/// Record a successful import.
pub async fn mark_ready(db: &SqlitePool, activity_id: &str, attempts: u32) -> Result<()> {
    sqlx::query(
        "INSERT INTO detail_status (activity_id, state, last_success_at, attempts, last_error)
         VALUES (?, 'ready', ?, ?, NULL)
         ON CONFLICT(activity_id) DO UPDATE SET
            state = 'ready',
            last_success_at = excluded.last_success_at,
            attempts = excluded.attempts,
            last_error = NULL",
    )
    .bind(activity_id)
    .bind(time::now_iso())
    .bind(attempts as i64)
    .execute(db)
    .await
    .map_err(|e| Error::Database(e.to_string()))?;
    Ok(())
}

/// Record a failed import after retries were exhausted.
pub async fn mark_error(
    db: &SqlitePool,
    activity_id: &str,
    attempts: u32,
    message: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO detail_status (activity_id, state, last_error_at, attempts, last_error)
         VALUES (?, 'error', ?, ?, ?)
         ON CONFLICT(activity_id) DO UPDATE SET
            state = 'error',
            last_error_at = excluded.last_error_at,
            attempts = excluded.attempts,
            last_error = excluded.last_error",
    )
    .bind(activity_id)
    .bind(time::now_iso())
    .bind(attempts as i64)
    .bind(message)
    .execute(db)
    .await
    .map_err(|e| Error::Database(e.to_string()))?;
    Ok(())
}
