//! Strava API client
//!
//! Handles activity listing, single-activity fetches, OAuth token refresh,
//! and the provider's comma-pair rate limit headers. Rate-limited list calls
//! are retried with exponential backoff before giving up.

use std::time::Duration;

use paceline_common::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use sqlx::SqlitePool;

use crate::store::tokens::{self, TokenSet};

const USER_AGENT: &str = concat!("paceline/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;
const RATE_LIMIT_RETRIES: u32 = 3;

/// Provider rate limit state, from the `X-RateLimit-Limit` / `X-RateLimit-Usage`
/// headers. Each header carries a `short,daily` pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimitInfo {
    pub short_limit: Option<u32>,
    pub daily_limit: Option<u32>,
    pub short_usage: Option<u32>,
    pub daily_usage: Option<u32>,
}

impl RateLimitInfo {
    fn from_headers(headers: &reqwest::header::HeaderMap) -> Self {
        let pair = |name: &str| -> (Option<u32>, Option<u32>) {
            let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) else {
                return (None, None);
            };
            let mut parts = value.split(',').map(|p| p.trim().parse::<u32>().ok());
            (parts.next().flatten(), parts.next().flatten())
        };
        let (short_limit, daily_limit) = pair("x-ratelimit-limit");
        let (short_usage, daily_usage) = pair("x-ratelimit-usage");
        Self {
            short_limit,
            daily_limit,
            short_usage,
            daily_usage,
        }
    }

    /// True when the short window is at or over its limit.
    pub fn short_window_exhausted(&self) -> bool {
        matches!(
            (self.short_usage, self.short_limit),
            (Some(usage), Some(limit)) if usage >= limit
        )
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_at: i64,
    #[serde(default = "default_token_type")]
    token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Client for the Strava v3 API.
pub struct StravaClient {
    client: reqwest::Client,
    base_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl StravaClient {
    pub fn new(
        base_url: &str,
        token_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token_url: token_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    /// List activities after a cutoff, one page at a time.
    pub async fn list_activities(
        &self,
        access_token: &str,
        after_epoch_s: i64,
        page: u32,
        per_page: u32,
    ) -> Result<(Vec<Value>, RateLimitInfo)> {
        let url = format!("{}/athlete/activities", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .query(&[
                ("after", after_epoch_s.to_string()),
                ("page", page.to_string()),
                ("per_page", per_page.to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::Upstream {
                status: 0,
                message: format!("activities request failed: {e}"),
            })?;

        let rate_limit = RateLimitInfo::from_headers(response.headers());
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream(status.as_u16(), &body));
        }

        let items: Vec<Value> = response.json().await.map_err(|e| Error::Upstream {
            status: status.as_u16(),
            message: format!("invalid activities payload: {e}"),
        })?;
        Ok((items, rate_limit))
    }

    /// List activities, retrying rate limit and transport failures with
    /// exponential backoff (2^attempt seconds).
    pub async fn list_activities_with_retry(
        &self,
        access_token: &str,
        after_epoch_s: i64,
        page: u32,
        per_page: u32,
    ) -> Result<(Vec<Value>, RateLimitInfo)> {
        let mut attempt = 0u32;
        loop {
            match self
                .list_activities(access_token, after_epoch_s, page, per_page)
                .await
            {
                Ok(result) => return Ok(result),
                Err(Error::Upstream { status, message })
                    if (status == 429 || status == 0) && attempt < RATE_LIMIT_RETRIES =>
                {
                    attempt += 1;
                    let backoff = Duration::from_secs(1 << attempt);
                    tracing::warn!(
                        status,
                        attempt,
                        backoff_secs = backoff.as_secs(),
                        "Activity list fetch throttled, backing off: {}",
                        message
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch a single activity with all efforts.
    pub async fn get_activity(&self, access_token: &str, activity_id: &str) -> Result<Value> {
        let url = format!("{}/activities/{}", self.base_url, activity_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("include_all_efforts", "true")])
            .send()
            .await
            .map_err(|e| Error::Upstream {
                status: 0,
                message: format!("activity request failed: {e}"),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("activity {activity_id}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream(status.as_u16(), &body));
        }

        response.json().await.map_err(|e| Error::Upstream {
            status: status.as_u16(),
            message: format!("invalid activity payload: {e}"),
        })
    }

    /// Exchange a refresh token for a new token set.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| Error::Upstream {
                status: 0,
                message: format!("token refresh failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream(status.as_u16(), &body));
        }

        let token: TokenResponse = response.json().await.map_err(|e| Error::Upstream {
            status: status.as_u16(),
            message: format!("invalid token payload: {e}"),
        })?;
        Ok(TokenSet {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token.expires_at,
            token_type: token.token_type,
        })
    }

    /// Return a valid access token for the user, refreshing and persisting
    /// when the stored one is expired or near expiry.
    pub async fn fresh_access_token(&self, db: &SqlitePool, user_id: i64) -> Result<String> {
        let Some(stored) = tokens::get_token(db, user_id).await? else {
            return Err(Error::NotFound(format!("tokens for user {user_id}")));
        };

        let now = chrono::Utc::now().timestamp();
        if !stored.is_expired(now) {
            return Ok(stored.access_token);
        }

        tracing::info!(user_id, "Access token expired, refreshing");
        let refreshed = self.refresh_token(&stored.refresh_token).await?;
        tokens::put_token(db, user_id, &refreshed).await?;
        Ok(refreshed.access_token)
    }
}
