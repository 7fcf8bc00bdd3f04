//! Service configuration
//!
//! Loaded from a TOML file, then overridden field-by-field from the
//! environment: ENV > TOML > compiled default. The config file path itself
//! comes from `PACELINE_CONFIG` (default `paceline.toml` in the working
//! directory); a missing file is not an error, the defaults apply.
//!
//! Upstream knobs keep the environment variable names the deployment already
//! uses (`STRAVA_CLIENT_ID`, `MAKE_WEBHOOK_URL_ACTIVITIES`, `DETAIL_*`).

use serde::Deserialize;

use crate::{Error, Result};

/// Complete service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen address for the HTTP server
    pub bind: String,
    /// SQLite database file path
    pub database_path: String,

    /// Tracking provider REST base URL
    pub strava_base_url: String,
    /// Tracking provider OAuth token endpoint
    pub strava_token_url: String,
    pub strava_client_id: Option<String>,
    pub strava_client_secret: Option<String>,
    /// Shared token echoed back during webhook subscription verification
    pub webhook_verify_token: Option<String>,

    /// Relay scenario URL for incremental activity lists
    pub relay_list_url: Option<String>,
    /// Relay scenario URL for single-activity detail fetches
    pub relay_detail_url: Option<String>,

    /// Lookback window for the list refresh fallback, in days
    pub window_days: i64,
    /// Lookback for the very first provider sync, in days
    pub first_sync_days: i64,
    /// Cached list counts as stale after this many minutes without a refresh
    pub stale_after_minutes: i64,
    /// Athlete id assumed when a request does not name one
    pub default_user_id: Option<i64>,

    /// Detail auto-import worker pool size
    pub detail_max_concurrency: usize,
    /// Pause before each detail fetch, in milliseconds
    pub detail_call_delay_ms: u64,
    /// Per-call timeout for detail fetches, in milliseconds
    pub detail_call_timeout_ms: u64,
    /// Additional attempts after the first failed detail fetch
    pub detail_retry_max: u32,

    /// Max attempts per page during the admin backfill
    pub import_max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5730".to_string(),
            database_path: "paceline.db".to_string(),
            strava_base_url: "https://www.strava.com/api/v3".to_string(),
            strava_token_url: "https://www.strava.com/oauth/token".to_string(),
            strava_client_id: None,
            strava_client_secret: None,
            webhook_verify_token: None,
            relay_list_url: None,
            relay_detail_url: None,
            window_days: 28,
            first_sync_days: 7,
            stale_after_minutes: 15,
            default_user_id: None,
            detail_max_concurrency: 3,
            detail_call_delay_ms: 200,
            detail_call_timeout_ms: 10_000,
            detail_retry_max: 2,
            import_max_retries: 3,
        }
    }
}

impl Config {
    /// Load configuration: TOML file (if present) with env overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("PACELINE_CONFIG").unwrap_or_else(|_| "paceline.toml".to_string());
        let mut config = if std::path::Path::new(&path).exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Parse {path} failed: {e}")))?
        } else {
            Config::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides on top of file/default values.
    pub fn apply_env(&mut self) {
        override_string(&mut self.bind, "PACELINE_BIND");
        override_string(&mut self.database_path, "PACELINE_DATABASE_PATH");
        override_string(&mut self.strava_base_url, "STRAVA_BASE_URL");
        override_string(&mut self.strava_token_url, "STRAVA_TOKEN_URL");
        override_opt(&mut self.strava_client_id, "STRAVA_CLIENT_ID");
        override_opt(&mut self.strava_client_secret, "STRAVA_CLIENT_SECRET");
        override_opt(&mut self.webhook_verify_token, "STRAVA_WEBHOOK_VERIFY_TOKEN");
        override_opt(&mut self.relay_list_url, "MAKE_WEBHOOK_URL_ACTIVITIES");
        override_opt(&mut self.relay_detail_url, "MAKE_WEBHOOK_URL_ACTIVITY");
        override_parse(&mut self.window_days, "PACELINE_WINDOW_DAYS");
        override_parse(&mut self.first_sync_days, "PACELINE_FIRST_SYNC_DAYS");
        override_parse(&mut self.stale_after_minutes, "PACELINE_STALE_AFTER_MINUTES");
        if let Ok(v) = std::env::var("PACELINE_DEFAULT_USER_ID") {
            if let Ok(parsed) = v.parse() {
                self.default_user_id = Some(parsed);
            }
        }
        override_parse(&mut self.detail_max_concurrency, "DETAIL_MAX_CONCURRENCY");
        override_parse(&mut self.detail_call_delay_ms, "DETAIL_CALL_DELAY_MS");
        override_parse(&mut self.detail_call_timeout_ms, "DETAIL_CALL_TIMEOUT_MS");
        override_parse(&mut self.detail_retry_max, "DETAIL_RETRY_MAX");
        override_parse(&mut self.import_max_retries, "PACELINE_IMPORT_MAX_RETRIES");
    }

    fn validate(&self) -> Result<()> {
        if self.detail_max_concurrency == 0 {
            return Err(Error::Config(
                "detail_max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.window_days <= 0 || self.first_sync_days <= 0 {
            return Err(Error::Config(
                "window_days and first_sync_days must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn override_string(target: &mut String, var: &str) {
    if let Ok(v) = std::env::var(var) {
        if !v.trim().is_empty() {
            *target = v;
        }
    }
}

fn override_opt(target: &mut Option<String>, var: &str) {
    if let Ok(v) = std::env::var(var) {
        if !v.trim().is_empty() {
            *target = Some(v);
        }
    }
}

fn override_parse<T: std::str::FromStr>(target: &mut T, var: &str) {
    if let Ok(v) = std::env::var(var) {
        if let Ok(parsed) = v.parse() {
            *target = parsed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.detail_max_concurrency, 3);
        assert_eq!(config.detail_retry_max, 2);
        assert_eq!(config.window_days, 28);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn toml_overrides_defaults() {
        let config: Config = toml::from_str(
            r#"
            bind = "0.0.0.0:9000"
            window_days = 14
            relay_list_url = "https://hook.example/list"
            "#,
        )
        .unwrap();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.window_days, 14);
        assert_eq!(
            config.relay_list_url.as_deref(),
            Some("https://hook.example/list")
        );
        // untouched fields keep defaults
        assert_eq!(config.detail_call_delay_ms, 200);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let config: Config = toml::from_str("detail_max_concurrency = 0").unwrap();
        assert!(config.validate().is_err());
    }
}
