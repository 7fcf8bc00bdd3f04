//! Schema-on-read normalization of upstream activity payloads
//!
//! The provider and the relay disagree about field names (`moving_time` vs
//! `time_moving`, `distance` vs `distance_meter`, ...), about date encodings
//! (ISO strings, epoch seconds, epoch milliseconds), and the relay sometimes
//! serializes lap/split lists as several JSON objects concatenated inside a
//! single string. Everything funnels through here before touching storage,
//! so the rest of the codebase only ever sees [`crate::model`] types.

use serde_json::Value;

use crate::enrich;
use crate::model::{ActivityDetail, ActivitySummary, Lap, Split};
use crate::time;

/// Keys probed, in order, for an activity start timestamp.
const DATE_KEYS: &[&str] = &[
    "date",
    "start_date",
    "start_date_local",
    "start",
    "startDate",
    "timestamp",
    "start_time",
];

/// Epoch ms for 2000-01-01T00:00:00Z. Anything earlier is a mangled or
/// zeroed timestamp (the "1970 date" failure mode) and is rejected.
const MIN_VALID_EPOCH_MS: i64 = 946_684_800_000;

/// Why a raw payload was rejected (used for structured skip logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NoId,
    BadOrOldDate,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::NoId => "no_id",
            RejectReason::BadOrOldDate => "bad_or_old_date",
        }
    }
}

/// Normalize a raw summary payload from either upstream.
///
/// Returns the reject reason instead of the summary when the payload has no
/// usable id or no plausible start date.
pub fn normalize_summary(raw: &Value) -> Result<ActivitySummary, RejectReason> {
    let activity_id = extract_id(raw).ok_or(RejectReason::NoId)?;
    let date = extract_date(raw).ok_or(RejectReason::BadOrOldDate)?;

    let kind = str_alias(raw, &["type", "sport_type"]).unwrap_or_else(|| "Unknown".to_string());
    let distance_meter = f64_alias(raw, &["distance_meter", "distance"]).unwrap_or(0.0);
    let time_moving = i64_alias(raw, &["time_moving", "moving_time"]).unwrap_or(0);
    let avg_hr = f64_alias(raw, &["avg_hr", "average_heartrate"]);
    let avg_watts = f64_alias(raw, &["avg_watts", "average_watts"]);
    let avg_speed = f64_alias(raw, &["avg_speed", "average_speed"]);
    let commute = bool_alias(raw, &["commute", "comute"]);

    let charge = f64_alias(raw, &["charge"]).or_else(|| enrich::charge(avg_hr, time_moving));
    let intensity =
        f64_alias(raw, &["intensity"]).or_else(|| enrich::intensity(avg_hr, avg_speed));

    Ok(ActivitySummary {
        activity_id,
        date,
        kind,
        distance_meter,
        time_moving,
        avg_hr,
        avg_watts,
        elevation: f64_alias(raw, &["elevation", "total_elevation_gain"]),
        suffer_score: f64_alias(raw, &["suffer_score"]),
        charge,
        intensity,
        commute,
        has_detail: raw.get("has_detail").and_then(Value::as_bool).unwrap_or(false),
    })
}

/// Normalize a raw detail payload (splits, laps, max values).
pub fn normalize_detail(raw: &Value) -> Result<ActivityDetail, RejectReason> {
    let item = unwrap_item(raw);
    let activity_id = extract_id(item).ok_or(RejectReason::NoId)?;
    let date = extract_date(item).ok_or(RejectReason::BadOrOldDate)?;

    let kind = str_alias(item, &["type", "sport_type"]).unwrap_or_else(|| "Unknown".to_string());
    let time_moving = i64_alias(item, &["time_moving", "moving_time"]).unwrap_or(0);
    let avg_hr = f64_alias(item, &["avg_hr", "average_heartrate"]);
    let avg_speed = f64_alias(item, &["avg_speed", "average_speed"]);

    let splits = list_alias(item, &["splits", "Splits", "splits_metric"])
        .map(|entries| entries.iter().enumerate().map(normalize_split).collect());
    let laps = list_alias(item, &["laps", "Laps"])
        .map(|entries| entries.iter().enumerate().map(normalize_lap).collect());

    Ok(ActivityDetail {
        activity_id,
        name: str_alias(item, &["name"]),
        date,
        kind,
        distance_meter: f64_alias(item, &["distance_meter", "distance"]).unwrap_or(0.0),
        time_moving,
        time_elapsed: i64_alias(item, &["time_elapsed", "elapsed_time"]).unwrap_or(time_moving),
        avg_hr,
        max_hr: f64_alias(item, &["max_hr", "max_heartrate"]),
        avg_watts: f64_alias(item, &["avg_watts", "average_watts"]),
        max_watts: f64_alias(item, &["max_watts"]),
        avg_cadence: f64_alias(item, &["avg_cadence", "average_cadence"]),
        elevation_gain: f64_alias(item, &["elevation_gain", "elevation", "total_elevation_gain"]),
        elevation_loss: f64_alias(item, &["elevation_loss"]),
        suffer_score: f64_alias(item, &["suffer_score"]),
        commute: bool_alias(item, &["commute", "comute"]),
        charge: f64_alias(item, &["charge"]).or_else(|| enrich::charge(avg_hr, time_moving)),
        intensity: f64_alias(item, &["intensity"])
            .or_else(|| enrich::intensity(avg_hr, avg_speed)),
        splits,
        laps,
        raw_ref: None,
    })
}

/// Synthesize a list summary from a cached detail record.
///
/// Used when a detail arrives for an activity the summary index has never
/// seen (e.g. detail ingestion raced the incremental list refresh).
pub fn summarize_from_detail(detail: &ActivityDetail) -> ActivitySummary {
    ActivitySummary {
        activity_id: detail.activity_id.clone(),
        date: detail.date.clone(),
        kind: detail.kind.clone(),
        distance_meter: detail.distance_meter,
        time_moving: detail.time_moving,
        avg_hr: detail.avg_hr,
        avg_watts: detail.avg_watts,
        elevation: detail.elevation_gain,
        suffer_score: detail.suffer_score,
        charge: detail.charge,
        intensity: detail.intensity,
        commute: detail.commute,
        has_detail: true,
    }
}

/// The relay wraps single records as `{"item": {...}}` and occasionally as a
/// one-element array.
fn unwrap_item(raw: &Value) -> &Value {
    let raw = raw.get("item").unwrap_or(raw);
    match raw {
        Value::Array(items) => items.first().unwrap_or(raw),
        _ => raw,
    }
}

fn extract_id(raw: &Value) -> Option<String> {
    for key in ["activity_id", "id"] {
        match raw.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.trim().to_string()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn extract_date(raw: &Value) -> Option<String> {
    for key in DATE_KEYS {
        if let Some(value) = raw.get(*key) {
            if let Some(iso) = time::json_timestamp_to_iso(value) {
                if time::iso_to_epoch_ms(&iso)? >= MIN_VALID_EPOCH_MS {
                    return Some(iso);
                }
            }
        }
    }
    None
}

fn f64_alias(raw: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| match raw.get(*k) {
        Some(Value::Number(n)) => n.as_f64(),
        // the relay stringifies some numeric fields
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

fn i64_alias(raw: &Value, keys: &[&str]) -> Option<i64> {
    f64_alias(raw, keys).map(|v| v.round() as i64)
}

fn str_alias(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| {
        raw.get(*k)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.to_string())
    })
}

fn bool_alias(raw: &Value, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|k| raw.get(*k).and_then(Value::as_bool))
}

/// Find the first present list-ish field and coerce it to a list of objects.
fn list_alias(raw: &Value, keys: &[&str]) -> Option<Vec<Value>> {
    keys.iter()
        .find_map(|k| raw.get(*k).and_then(coerce_object_list))
}

/// Coerce a lap/split field into a list of JSON objects.
///
/// Accepted shapes, in order of sanity:
/// - a JSON array
/// - a bare object (wrapped into a one-element list)
/// - a string containing an array or object
/// - a string containing several concatenated objects: `{..}, {..}, {..}`
fn coerce_object_list(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items.clone()),
        Value::Object(_) => Some(vec![value.clone()]),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            if trimmed.starts_with('[') {
                if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
                    return Some(items);
                }
            }
            if trimmed.starts_with('{') {
                if let Ok(parsed) = serde_json::from_str::<Value>(trimmed) {
                    return Some(vec![parsed]);
                }
                // concatenated object list: wrap in brackets and retry
                if let Ok(Value::Array(items)) =
                    serde_json::from_str::<Value>(&format!("[{trimmed}]"))
                {
                    return Some(items);
                }
            }
            None
        }
        _ => None,
    }
}

fn normalize_split((position, raw): (usize, &Value)) -> Split {
    let distance_meter = f64_alias(raw, &["distance_meter", "distance"]).unwrap_or(0.0);
    let time_moving = i64_alias(raw, &["time_moving", "moving_time"]).unwrap_or(0);
    let pace = f64_alias(raw, &["pace_s_per_km"]).or_else(|| {
        if distance_meter > 0.0 && time_moving > 0 {
            Some(time_moving as f64 / distance_meter * 1000.0)
        } else {
            None
        }
    });
    Split {
        index: i64_alias(raw, &["index", "split"]).unwrap_or(position as i64 + 1) as u32,
        distance_meter,
        time_moving,
        pace_s_per_km: pace,
        avg_hr: f64_alias(raw, &["avg_hr", "average_heartrate"]),
        avg_watts: f64_alias(raw, &["avg_watts", "average_watts"]),
    }
}

fn normalize_lap((position, raw): (usize, &Value)) -> Lap {
    Lap {
        index: i64_alias(raw, &["index", "lap_index"]).unwrap_or(position as i64 + 1) as u32,
        distance_meter: f64_alias(raw, &["distance_meter", "distance"]).unwrap_or(0.0),
        time_moving: i64_alias(raw, &["time_moving", "moving_time"]).unwrap_or(0),
        avg_hr: f64_alias(raw, &["avg_hr", "average_heartrate"]),
        avg_watts: f64_alias(raw, &["avg_watts", "average_watts"]),
        note: str_alias(raw, &["note", "name"]),
    }
}
