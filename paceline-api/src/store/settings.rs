//! Settings key/value accessors
//!
//! Sync metadata lives here: the last-seen activity timestamp that drives
//! staleness, the last refresh stamp, and the admin import status.

use paceline_common::{Error, Result};
use sqlx::SqlitePool;

pub const LAST_ACTIVITY_ISO: &str = "last_activity_iso";
pub const REFRESHED_AT: &str = "refreshed_at";
pub const IMPORT_STATUS: &str = "import_status";
pub const IMPORT_PROGRESS: &str = "import_progress";

/// Get a setting value, None when unset.
pub async fn get_setting(db: &SqlitePool, key: &str) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
    Ok(row.map(|(value,)| value))
}

/// Set (upsert) a setting value.
pub async fn set_setting(db: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(db)
    .await
    .map_err(|e| Error::Database(e.to_string()))?;
    Ok(())
}

pub async fn get_last_activity_iso(db: &SqlitePool) -> Result<Option<String>> {
    get_setting(db, LAST_ACTIVITY_ISO).await
}

pub async fn set_last_activity_iso(db: &SqlitePool, iso: &str) -> Result<()> {
    set_setting(db, LAST_ACTIVITY_ISO, iso).await
}

pub async fn get_refreshed_at(db: &SqlitePool) -> Result<Option<String>> {
    get_setting(db, REFRESHED_AT).await
}

pub async fn set_refreshed_at(db: &SqlitePool, iso: &str) -> Result<()> {
    set_setting(db, REFRESHED_AT, iso).await
}
