//! Timestamp helpers
//!
//! The relay forwards dates in whatever shape the upstream scenario produced:
//! ISO-8601 strings, epoch seconds, or epoch milliseconds. These helpers
//! normalize all of them to UTC ISO-8601.

use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use serde_json::Value;

/// Epoch values below this magnitude are interpreted as seconds,
/// at or above as milliseconds (1e11 seconds is year 5138).
const EPOCH_MS_THRESHOLD: f64 = 1e11;

/// Current time as an ISO-8601 UTC string.
pub fn now_iso() -> String {
    to_iso(Utc::now())
}

/// Format a datetime as ISO-8601 UTC with millisecond precision.
pub fn to_iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// ISO-8601 UTC timestamp `days` days before now.
pub fn days_ago_iso(days: i64) -> String {
    to_iso(Utc::now() - Duration::days(days))
}

/// Parse an ISO-8601 string, returning None for anything unparseable.
pub fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Epoch milliseconds for an ISO-8601 string.
pub fn iso_to_epoch_ms(s: &str) -> Option<i64> {
    parse_iso(s).map(|dt| dt.timestamp_millis())
}

/// Interpret a JSON value as a timestamp: ISO string, epoch seconds, or
/// epoch milliseconds (disambiguated by magnitude). Returns ISO-8601 UTC.
pub fn json_timestamp_to_iso(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => parse_iso(s).map(to_iso),
        Value::Number(n) => {
            let v = n.as_f64()?;
            let ms = if v.abs() < EPOCH_MS_THRESHOLD {
                (v * 1000.0) as i64
            } else {
                v as i64
            };
            Utc.timestamp_millis_opt(ms).single().map(to_iso)
        }
        _ => None,
    }
}
