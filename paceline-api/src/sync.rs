//! Incremental synchronization against the relay and the provider
//!
//! Two paths keep the summary index current. The relay path
//! ([`refresh_window`]) pulls raw summaries newer than the stored watermark
//! and is what list requests trigger when the cache is stale. The provider
//! path ([`smart_sync`]) walks the athlete's recent activities directly and
//! fully ingests anything the index has never seen, including details for
//! eligible activities.

use paceline_common::model::is_detail_import_eligible;
use paceline_common::{normalize, time, Result};
use sqlx::SqlitePool;

use crate::clients::{RelayClient, StravaClient};
use crate::store::{activities, details, settings};

/// Outcome of a relay window refresh.
#[derive(Debug, Default)]
pub struct RefreshOutcome {
    pub imported: usize,
    pub skipped: usize,
    pub last_activity_iso: Option<String>,
}

/// Outcome of a provider smart sync.
#[derive(Debug, Default, serde::Serialize)]
pub struct SyncReport {
    pub total_checked: usize,
    pub new_found: usize,
    pub processed: usize,
    pub errors: usize,
    pub error_details: Vec<String>,
    pub last_sync_before: Option<String>,
    pub last_sync_after: Option<String>,
}

/// Decide whether the cached window needs a refresh.
///
/// The cache is stale when no activity has ever been seen, or when the last
/// successful refresh is older than `stale_after_minutes`.
pub async fn is_stale(db: &SqlitePool, stale_after_minutes: u64) -> Result<bool> {
    if settings::get_last_activity_iso(db).await?.is_none() {
        return Ok(true);
    }
    let Some(refreshed_at) = settings::get_refreshed_at(db).await? else {
        return Ok(true);
    };
    let Some(refreshed) = time::parse_iso(&refreshed_at) else {
        return Ok(true);
    };
    let age = chrono::Utc::now() - refreshed;
    Ok(age > chrono::Duration::minutes(stale_after_minutes as i64))
}

/// Pull summaries newer than the watermark from the relay and upsert them.
///
/// On a cold cache the watermark falls back to `window_days` ago. The
/// refreshed-at stamp is written even when nothing new arrived, so an empty
/// upstream does not cause a refresh on every request.
pub async fn refresh_window(
    db: &SqlitePool,
    relay: &RelayClient,
    window_days: i64,
    limit: i64,
) -> Result<RefreshOutcome> {
    let watermark = match settings::get_last_activity_iso(db).await? {
        Some(iso) => iso,
        None => time::days_ago_iso(window_days),
    };

    let list = relay.list_incremental(Some(&watermark), limit).await?;
    tracing::debug!(
        after = %watermark,
        received = list.items.len(),
        "Relay window refresh"
    );

    let mut outcome = RefreshOutcome::default();
    let mut newest = settings::get_last_activity_iso(db).await?;

    for raw in &list.items {
        let summary = match normalize::normalize_summary(raw) {
            Ok(summary) => summary,
            Err(reason) => {
                tracing::warn!(
                    reason = reason.as_str(),
                    payload_keys = ?raw.as_object().map(|o| o.keys().collect::<Vec<_>>()),
                    "Skipping unusable relay summary"
                );
                outcome.skipped += 1;
                continue;
            }
        };
        activities::upsert_summary(db, None, &summary).await?;
        outcome.imported += 1;
        if newest.as_deref().map_or(true, |n| summary.date.as_str() > n) {
            newest = Some(summary.date.clone());
        }
    }

    // the relay may report a newer watermark than any item it returned;
    // renormalize it so precision differences cannot skew the comparison
    if let Some(reported) = list
        .last_activity_iso
        .as_deref()
        .and_then(time::parse_iso)
        .map(time::to_iso)
    {
        if newest.as_deref().map_or(true, |n| reported.as_str() > n) {
            newest = Some(reported);
        }
    }

    if let Some(iso) = &newest {
        settings::set_last_activity_iso(db, iso).await?;
    }
    settings::set_refreshed_at(db, &time::now_iso()).await?;

    outcome.last_activity_iso = newest;
    Ok(outcome)
}

/// Walk recent provider activities and fully ingest anything unknown.
pub async fn smart_sync(
    db: &SqlitePool,
    strava: &StravaClient,
    user_id: i64,
    first_sync_days: i64,
) -> Result<SyncReport> {
    let mut report = SyncReport {
        last_sync_before: settings::get_last_activity_iso(db).await?,
        ..Default::default()
    };

    let access_token = strava.fresh_access_token(db, user_id).await?;

    let after_epoch_s = match &report.last_sync_before {
        Some(iso) => time::iso_to_epoch_ms(iso).map(|ms| ms / 1000).unwrap_or(0),
        None => (chrono::Utc::now() - chrono::Duration::days(first_sync_days)).timestamp(),
    };

    let (items, rate_limit) = strava
        .list_activities_with_retry(&access_token, after_epoch_s, 1, 50)
        .await?;
    if rate_limit.short_window_exhausted() {
        tracing::warn!(?rate_limit, "Provider rate limit window exhausted");
    }

    report.total_checked = items.len();
    for raw in &items {
        let Some(activity_id) = raw
            .get("id")
            .map(|id| id.to_string().trim_matches('"').to_string())
        else {
            continue;
        };
        if activities::has_summary(db, &activity_id).await? {
            continue;
        }
        report.new_found += 1;

        match process_activity(db, strava, &access_token, &activity_id, user_id).await {
            Ok(()) => report.processed += 1,
            Err(e) => {
                tracing::warn!(activity_id = %activity_id, error = %e, "Sync of activity failed");
                report.errors += 1;
                report.error_details.push(format!("{activity_id}: {e}"));
            }
        }
    }

    report.last_sync_after = settings::get_last_activity_iso(db).await?;
    tracing::info!(
        checked = report.total_checked,
        new = report.new_found,
        processed = report.processed,
        errors = report.errors,
        "Smart sync complete"
    );
    Ok(report)
}

/// Fetch one activity from the provider and ingest summary plus, when the
/// activity qualifies for detail import, its full detail payload.
///
/// Shared by [`smart_sync`] and the webhook create handler.
pub async fn process_activity(
    db: &SqlitePool,
    strava: &StravaClient,
    access_token: &str,
    activity_id: &str,
    user_id: i64,
) -> Result<()> {
    let raw = strava.get_activity(access_token, activity_id).await?;

    let summary = match normalize::normalize_summary(&raw) {
        Ok(summary) => summary,
        Err(reason) => {
            tracing::warn!(
                activity_id,
                reason = reason.as_str(),
                "Skipping unusable provider activity"
            );
            return Ok(());
        }
    };

    let eligible = is_detail_import_eligible(&summary.kind, summary.commute);
    activities::upsert_summary(db, Some(user_id), &summary).await?;
    advance_watermark(db, &summary.date).await?;

    if eligible {
        if let Ok(detail) = normalize::normalize_detail(&raw) {
            details::put_detail(db, activity_id, &raw, &detail).await?;
            details::mark_ready(db, activity_id, 1).await?;
            activities::mark_has_detail(db, activity_id).await?;
        }
    }
    Ok(())
}

/// Advance the last-activity watermark, never moving it backwards.
async fn advance_watermark(db: &SqlitePool, date_iso: &str) -> Result<()> {
    let current = settings::get_last_activity_iso(db).await?;
    if current.as_deref().map_or(true, |c| date_iso > c) {
        settings::set_last_activity_iso(db, date_iso).await?;
    }
    Ok(())
}
