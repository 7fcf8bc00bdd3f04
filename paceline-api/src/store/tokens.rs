//! Per-user OAuth token storage

use paceline_common::{Error, Result};
use sqlx::SqlitePool;

/// Seconds before the recorded expiry at which a token is treated as expired,
/// so a token never dies mid-request.
pub const EXPIRY_BUFFER_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds.
    pub expires_at: i64,
    pub token_type: String,
}

impl TokenSet {
    /// True when the token is expired or within the refresh buffer.
    pub fn is_expired(&self, now_epoch_s: i64) -> bool {
        now_epoch_s >= self.expires_at - EXPIRY_BUFFER_SECS
    }
}

/// Fetch the stored token set for a user.
pub async fn get_token(db: &SqlitePool, user_id: i64) -> Result<Option<TokenSet>> {
    let row: Option<(String, String, i64, String)> = sqlx::query_as(
        "SELECT access_token, refresh_token, expires_at, token_type
         FROM user_tokens WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(db)
    .await
    .map_err(|e| Error::Database(e.to_string()))?;

    Ok(row.map(|(access_token, refresh_token, expires_at, token_type)| TokenSet {
        access_token,
        refresh_token,
        expires_at,
        token_type,
    }))
}

/// Store (upsert) a token set for a user.
pub async fn put_token(db: &SqlitePool, user_id: i64, token: &TokenSet) -> Result<()> {
    sqlx::query(
        "INSERT INTO user_tokens (user_id, access_token, refresh_token, expires_at, token_type)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(user_id) DO UPDATE SET
            access_token = excluded.access_token,
            refresh_token = excluded.refresh_token,
            expires_at = excluded.expires_at,
            token_type = excluded.token_type",
    )
    .bind(user_id)
    .bind(&token.access_token)
    .bind(&token.refresh_token)
    .bind(token.expires_at)
    .bind(&token.token_type)
    .execute(db)
    .await
    .map_err(|e| Error::Database(e.to_string()))?;
    Ok(())
}
