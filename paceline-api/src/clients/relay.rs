//! Relay client for the webhook-automation endpoints
//!
//! The relay exposes two webhook URLs: an incremental activity list and a
//! per-activity detail fetch. Both are optional in configuration; calling an
//! unconfigured one is a configuration error, not an upstream failure.

use std::time::Duration;

use paceline_common::{Error, Result};
use serde_json::Value;

const USER_AGENT: &str = concat!("paceline/", env!("CARGO_PKG_VERSION"));
const LIST_TIMEOUT_SECS: u64 = 30;

/// Incremental list response: raw summary payloads plus the newest activity
/// timestamp the relay reported, used to advance the sync watermark.
#[derive(Debug)]
pub struct RelayList {
    pub items: Vec<Value>,
    pub last_activity_iso: Option<String>,
}

pub struct RelayClient {
    client: reqwest::Client,
    list_url: Option<String>,
    detail_url: Option<String>,
    detail_timeout: Duration,
}

impl RelayClient {
    pub fn new(
        list_url: Option<String>,
        detail_url: Option<String>,
        detail_timeout_ms: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(LIST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            list_url,
            detail_url,
            detail_timeout: Duration::from_millis(detail_timeout_ms),
        })
    }

    /// Fetch summaries newer than `after_iso`. Accepts either a bare array or
    /// an `{"items": [...], "last_activity_iso": ...}` envelope.
    pub async fn list_incremental(
        &self,
        after_iso: Option<&str>,
        limit: i64,
    ) -> Result<RelayList> {
        let url = self
            .list_url
            .as_deref()
            .ok_or_else(|| Error::Config("activities relay URL is not configured".to_string()))?;

        let mut request = self.client.get(url).query(&[("limit", limit.to_string())]);
        if let Some(after) = after_iso {
            request = request.query(&[("after", after)]);
        }

        let response = request.send().await.map_err(|e| Error::Upstream {
            status: 0,
            message: format!("relay list request failed: {e}"),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream(status.as_u16(), &body));
        }

        let body: Value = response.json().await.map_err(|e| Error::Upstream {
            status: status.as_u16(),
            message: format!("invalid relay list payload: {e}"),
        })?;

        match body {
            Value::Array(items) => Ok(RelayList {
                items,
                last_activity_iso: None,
            }),
            Value::Object(mut map) => {
                let items = match map.remove("items") {
                    Some(Value::Array(items)) => items,
                    Some(other) => vec![other],
                    None => Vec::new(),
                };
                let last_activity_iso = map
                    .get("last_activity_iso")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                Ok(RelayList {
                    items,
                    last_activity_iso,
                })
            }
            other => Err(Error::Upstream {
                status: status.as_u16(),
                message: format!("unexpected relay list payload type: {other}"),
            }),
        }
    }

    /// Fetch the full detail payload for one activity.
    pub async fn fetch_detail(&self, activity_id: &str) -> Result<Value> {
        let url = self
            .detail_url
            .as_deref()
            .ok_or_else(|| Error::Config("activity detail relay URL is not configured".to_string()))?;

        let response = self
            .client
            .get(url)
            .query(&[("activity_id", activity_id)])
            .timeout(self.detail_timeout)
            .send()
            .await
            .map_err(|e| Error::Upstream {
                status: 0,
                message: format!("relay detail request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream(status.as_u16(), &body));
        }

        let text = response.text().await.map_err(|e| Error::Upstream {
            status: status.as_u16(),
            message: format!("relay detail body unreadable: {e}"),
        })?;
        parse_detail_body(&text).ok_or_else(|| Error::upstream(status.as_u16(), &text))
    }
}

/// Parse a relay detail body. The relay occasionally concatenates several
/// JSON objects (`{..}, {..}`) into one response; wrap and retry as an array
/// when direct parsing fails.
fn parse_detail_body(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    if trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<Value>(&format!("[{trimmed}]")) {
            return Some(value);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_body_parses_plain_json() {
        let value = parse_detail_body(r#"{"activity_id": "1"}"#).unwrap();
        assert_eq!(value["activity_id"], "1");
    }

    #[test]
    fn detail_body_parses_concatenated_objects() {
        let value = parse_detail_body(r#"{"activity_id": "1"}, {"activity_id": "2"}"#).unwrap();
        let items = value.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["activity_id"], "2");
    }

    #[test]
    fn detail_body_rejects_garbage() {
        assert!(parse_detail_body("").is_none());
        assert!(parse_detail_body("not json").is_none());
    }
}
