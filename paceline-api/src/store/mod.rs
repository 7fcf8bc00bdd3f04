//! Storage layer: consolidated SQLite schema over sqlx
//!
//! Summaries and details are stored schema-on-read as JSON blobs; the typed
//! columns exist only for indexing and filtering.

pub mod activities;
pub mod details;
pub mod events;
pub mod settings;
pub mod tokens;

use std::path::Path;

use paceline_common::{Error, Result};
use sqlx::SqlitePool;

/// Initialize the database connection pool and create tables.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create tables if they do not exist.
async fn init_tables(pool: &SqlitePool) -> Result<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS activities (
            activity_id    TEXT PRIMARY KEY,
            user_id        INTEGER,
            start_epoch_ms INTEGER NOT NULL,
            sport_type     TEXT NOT NULL,
            commute        INTEGER,
            has_detail     INTEGER NOT NULL DEFAULT 0,
            summary        TEXT NOT NULL
        )
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_activities_recency
            ON activities (start_epoch_ms DESC, activity_id DESC)
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS activity_details (
            activity_id TEXT PRIMARY KEY,
            raw         TEXT NOT NULL,
            detail      TEXT NOT NULL,
            fetched_at  TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS detail_status (
            activity_id     TEXT PRIMARY KEY,
            state           TEXT NOT NULL,
            requested_at    TEXT,
            last_success_at TEXT,
            last_error_at   TEXT,
            attempts        INTEGER NOT NULL DEFAULT 0,
            last_error      TEXT
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS user_tokens (
            user_id       INTEGER PRIMARY KEY,
            access_token  TEXT NOT NULL,
            refresh_token TEXT NOT NULL,
            expires_at    INTEGER NOT NULL,
            token_type    TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS webhook_events (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            object_type TEXT NOT NULL,
            object_id   TEXT NOT NULL,
            aspect_type TEXT NOT NULL,
            owner_id    INTEGER NOT NULL,
            event_time  INTEGER NOT NULL,
            payload     TEXT NOT NULL,
            received_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    ];

    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
    }

    tracing::info!("Database tables initialized");
    Ok(())
}
