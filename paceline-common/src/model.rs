//! Domain model for activities, details, and ingestion status
//!
//! One canonical schema for the activity summary and the enriched detail.
//! Upstream payloads in other shapes are converted through
//! [`crate::normalize`] before they reach storage.

use serde::{Deserialize, Serialize};

/// Activity kinds eligible for detail auto-import.
pub const DETAIL_ELIGIBLE_KINDS: &[&str] = &["Run", "Ride"];

/// Detail auto-import policy, from the `detail` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailPolicy {
    Auto,
    Force,
    Off,
}

impl DetailPolicy {
    /// Parse a query-parameter value, defaulting to `Auto` for anything
    /// unrecognized.
    pub fn from_param(value: Option<&str>) -> Self {
        match value {
            Some("force") => DetailPolicy::Force,
            Some("off") => DetailPolicy::Off,
            _ => DetailPolicy::Auto,
        }
    }
}

/// List refresh policy, from the `refresh` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshPolicy {
    Auto,
    Force,
    Off,
}

impl RefreshPolicy {
    pub fn from_param(value: Option<&str>) -> Self {
        match value {
            Some("force") => RefreshPolicy::Force,
            Some("off") => RefreshPolicy::Off,
            _ => RefreshPolicy::Auto,
        }
    }
}

/// Why (or why not) an upstream refresh ran for a list request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshReason {
    None,
    AutoDueToStale,
    Force,
    Off,
}

impl RefreshReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshReason::None => "none",
            RefreshReason::AutoDueToStale => "auto_due_to_stale",
            RefreshReason::Force => "force",
            RefreshReason::Off => "off",
        }
    }
}

/// Per-activity detail ingestion state: pending → ready | error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailState {
    Pending,
    Ready,
    Error,
}

impl DetailState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetailState::Pending => "pending",
            DetailState::Ready => "ready",
            DetailState::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DetailState::Pending),
            "ready" => Some(DetailState::Ready),
            "error" => Some(DetailState::Error),
            _ => None,
        }
    }
}

/// Detail ingestion status record for one activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailStatus {
    pub state: DetailState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_at: Option<String>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// One kilometer/mile split within a detail record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub index: u32,
    pub distance_meter: f64,
    /// Moving time in seconds
    pub time_moving: i64,
    pub pace_s_per_km: Option<f64>,
    pub avg_hr: Option<f64>,
    pub avg_watts: Option<f64>,
}

/// One recorded lap within a detail record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lap {
    pub index: u32,
    pub distance_meter: f64,
    /// Moving time in seconds
    pub time_moving: i64,
    pub avg_hr: Option<f64>,
    pub avg_watts: Option<f64>,
    pub note: Option<String>,
}

/// Lightweight per-activity record shown in list views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub activity_id: String,
    /// ISO-8601 UTC start time
    pub date: String,
    /// Sport kind: "Run", "Ride", ...
    #[serde(rename = "type")]
    pub kind: String,
    pub distance_meter: f64,
    /// Moving time in seconds
    pub time_moving: i64,
    pub avg_hr: Option<f64>,
    pub avg_watts: Option<f64>,
    pub elevation: Option<f64>,
    pub suffer_score: Option<f64>,
    pub charge: Option<f64>,
    pub intensity: Option<f64>,
    /// None when the source did not say either way
    pub commute: Option<bool>,
    /// True once the enriched detail record is cached
    pub has_detail: bool,
}

/// Enriched per-activity record: splits, laps, max values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityDetail {
    pub activity_id: String,
    pub name: Option<String>,
    /// ISO-8601 UTC start time
    pub date: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub distance_meter: f64,
    pub time_moving: i64,
    pub time_elapsed: i64,
    pub avg_hr: Option<f64>,
    pub max_hr: Option<f64>,
    pub avg_watts: Option<f64>,
    pub max_watts: Option<f64>,
    pub avg_cadence: Option<f64>,
    pub elevation_gain: Option<f64>,
    pub elevation_loss: Option<f64>,
    pub suffer_score: Option<f64>,
    pub commute: Option<bool>,
    pub charge: Option<f64>,
    pub intensity: Option<f64>,
    pub splits: Option<Vec<Split>>,
    pub laps: Option<Vec<Lap>>,
    /// Pointer to the cached raw payload, when kept
    pub raw_ref: Option<String>,
}

/// Metadata block returned by the paginated list endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ActivitiesMeta {
    pub window_days: i64,
    pub refreshed_at: Option<String>,
    pub last_activity_iso: Option<String>,
    pub stale: bool,
    pub refresh_reason: RefreshReason,
    pub detail_policy: DetailPolicy,
    pub detail_enqueued_count: u64,
    pub detail_started_count: u64,
    pub detail_completed_count: u64,
    pub detail_errors_count: u64,
}

/// Response body of the paginated list endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ActivitiesListResponse {
    pub ok: bool,
    pub count: usize,
    pub next_cursor: Option<String>,
    pub meta: ActivitiesMeta,
    pub items: Vec<ActivitySummary>,
}

/// True when an activity qualifies for detail auto-import.
///
/// Rule: kind in the fixed allow-list AND commute known to be false.
/// An unknown commute flag (None) is not eligible.
pub fn is_detail_import_eligible(kind: &str, commute: Option<bool>) -> bool {
    DETAIL_ELIGIBLE_KINDS.contains(&kind) && commute == Some(false)
}
