//! Bounded-concurrency detail auto-import
//!
//! When a list request comes back with activities whose details are not yet
//! cached, this worker pool fetches them in the background of the request:
//! a shared queue drained by at most `max_concurrency` tasks, a pacing delay
//! before every upstream call, and a small linear-backoff retry per activity.
//! Every candidate ends in exactly one of the ready or error states.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use paceline_common::model::{is_detail_import_eligible, ActivitySummary, DetailPolicy};
use paceline_common::{normalize, Result};
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

/// Worker pool knobs, taken from [`paceline_common::Config`].
#[derive(Debug, Clone, Copy)]
pub struct DetailImportConfig {
    pub max_concurrency: usize,
    pub call_delay_ms: u64,
    pub retry_max: u32,
}

/// Linear backoff step between retry attempts.
const RETRY_BACKOFF_MS: u64 = 200;

/// Import counters, reported in list response metadata.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ImportCounters {
    pub enqueued: u64,
    pub started: u64,
    pub completed: u64,
    pub errors: u64,
}

#[derive(Default)]
struct SharedCounters {
    enqueued: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
    errors: AtomicU64,
}

impl SharedCounters {
    fn snapshot(&self) -> ImportCounters {
        ImportCounters {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Import missing details for the given summaries, honoring the policy.
///
/// `fetch` is the upstream detail call, injected so the pool is independent
/// of any particular client. `Off` does nothing at all. `Auto` imports
/// eligible activities whose details are neither cached nor already in
/// flight; `Force` re-imports eligible activities regardless of cache state.
///
/// Runs to completion before returning; the counters describe the whole
/// batch.
pub async fn auto_import_details<F, Fut>(
    db: &SqlitePool,
    cfg: DetailImportConfig,
    summaries: &[ActivitySummary],
    policy: DetailPolicy,
    fetch: F,
) -> Result<ImportCounters>
where
    F: Fn(String) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send,
{
    if policy == DetailPolicy::Off {
        return Ok(ImportCounters::default());
    }

    let mut candidates: Vec<String> = Vec::new();
    for summary in summaries {
        if !is_detail_import_eligible(&summary.kind, summary.commute) {
            continue;
        }
        if policy != DetailPolicy::Force {
            if summary.has_detail
                || crate::store::details::has_detail(db, &summary.activity_id).await?
                || crate::store::details::is_pending(db, &summary.activity_id).await?
            {
                continue;
            }
        }
        candidates.push(summary.activity_id.clone());
    }

    if candidates.is_empty() {
        return Ok(ImportCounters::default());
    }

    let counters = Arc::new(SharedCounters::default());
    for id in &candidates {
        crate::store::details::mark_pending(db, id).await?;
        counters.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    let workers = cfg.max_concurrency.max(1).min(candidates.len());
    tracing::info!(
        candidates = candidates.len(),
        workers,
        policy = ?policy,
        "Starting detail import batch"
    );

    let queue = Arc::new(Mutex::new(candidates.into_iter().collect::<VecDeque<_>>()));
    let mut join_set = JoinSet::new();

    for _ in 0..workers {
        let queue = Arc::clone(&queue);
        let counters = Arc::clone(&counters);
        let fetch = fetch.clone();
        let db = db.clone();
        join_set.spawn(async move {
            loop {
                let Some(activity_id) = queue.lock().await.pop_front() else {
                    break;
                };
                tokio::time::sleep(Duration::from_millis(cfg.call_delay_ms)).await;
                counters.started.fetch_add(1, Ordering::Relaxed);
                import_one(&db, cfg, &activity_id, &fetch, &counters).await;
            }
        });
    }

    while let Some(joined) = join_set.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Detail import worker panicked");
        }
    }

    Ok(counters.snapshot())
}

/// Fetch, normalize, and store one activity's detail, with retries.
async fn import_one<F, Fut>(
    db: &SqlitePool,
    cfg: DetailImportConfig,
    activity_id: &str,
    fetch: &F,
    counters: &SharedCounters,
) where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<Value>>,
{
    let max_attempts = cfg.retry_max + 1;
    let mut last_error = String::new();
    let mut attempts_made = 0;

    for attempt in 1..=max_attempts {
        attempts_made = attempt;
        match fetch(activity_id.to_string()).await {
            Ok(raw) => match normalize::normalize_detail(&raw) {
                Ok(detail) => {
                    if let Err(e) = store_success(db, activity_id, &raw, &detail, attempt).await {
                        last_error = e.to_string();
                        break;
                    }
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(reason) => {
                    // a malformed payload will not improve on retry
                    last_error = format!("unusable detail payload: {}", reason.as_str());
                    break;
                }
            },
            Err(e) => {
                last_error = e.to_string();
                tracing::warn!(
                    activity_id,
                    attempt,
                    max_attempts,
                    error = %last_error,
                    "Detail fetch attempt failed"
                );
                if attempt < max_attempts {
                    tokio::time::sleep(Duration::from_millis(
                        RETRY_BACKOFF_MS * u64::from(attempt),
                    ))
                    .await;
                }
            }
        }
    }

    counters.errors.fetch_add(1, Ordering::Relaxed);
    if let Err(e) =
        crate::store::details::mark_error(db, activity_id, attempts_made, &last_error).await
    {
        tracing::error!(activity_id, error = %e, "Failed to record detail import error");
    }
}

async fn store_success(
    db: &SqlitePool,
    activity_id: &str,
    raw: &Value,
    detail: &paceline_common::model::ActivityDetail,
    attempts: u32,
) -> Result<()> {
    crate::store::details::put_detail(db, activity_id, raw, detail).await?;
    if !crate::store::activities::mark_has_detail(db, activity_id).await? {
        // detail arrived before the summary index ever saw this activity
        let summary = normalize::summarize_from_detail(detail);
        crate::store::activities::upsert_summary(db, None, &summary).await?;
    }
    crate::store::details::mark_ready(db, activity_id, attempts).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use paceline_common::model::DetailState;
    use paceline_common::Error;
    use serde_json::json;

    fn cfg() -> DetailImportConfig {
        DetailImportConfig {
            max_concurrency: 3,
            call_delay_ms: 0,
            retry_max: 2,
        }
    }

    fn summary(id: &str, kind: &str, commute: Option<bool>) -> ActivitySummary {
        ActivitySummary {
            activity_id: id.to_string(),
            date: "2025-06-01T07:00:00.000Z".to_string(),
            kind: kind.to_string(),
            distance_meter: 10000.0,
            time_moving: 3000,
            avg_hr: None,
            avg_watts: None,
            elevation: None,
            suffer_score: None,
            charge: None,
            intensity: None,
            commute,
            has_detail: false,
        }
    }

    fn detail_payload(id: &str) -> Value {
        json!({
            "activity_id": id,
            "date": "2025-06-01T07:00:00.000Z",
            "type": "Run",
            "distance_meter": 10000,
            "time_moving": 3000
        })
    }

    fn counting_fetch(
        calls: Arc<AtomicU64>,
    ) -> impl Fn(String) -> std::pin::Pin<Box<dyn Future<Output = Result<Value>> + Send>>
           + Clone
           + Send
           + Sync
           + 'static {
        move |id: String| {
            calls.fetch_add(1, Ordering::Relaxed);
            Box::pin(async move { Ok(detail_payload(&id)) })
        }
    }

    async fn test_pool() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::store::init_database_pool(&dir.path().join("test.db"))
            .await
            .unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn policy_off_does_no_work() {
        let (_dir, pool) = test_pool().await;
        let calls = Arc::new(AtomicU64::new(0));
        let summaries = vec![summary("1", "Run", Some(false))];

        let counters = auto_import_details(
            &pool,
            cfg(),
            &summaries,
            DetailPolicy::Off,
            counting_fetch(Arc::clone(&calls)),
        )
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::Relaxed), 0);
        assert_eq!(counters.enqueued, 0);
        assert!(crate::store::details::get_status(&pool, "1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn ineligible_activities_are_never_selected() {
        let (_dir, pool) = test_pool().await;
        let calls = Arc::new(AtomicU64::new(0));
        let summaries = vec![
            summary("walk", "Walk", Some(false)),
            summary("commute-ride", "Ride", Some(true)),
            summary("unknown-commute", "Run", None),
        ];

        let counters = auto_import_details(
            &pool,
            cfg(),
            &summaries,
            DetailPolicy::Auto,
            counting_fetch(Arc::clone(&calls)),
        )
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::Relaxed), 0);
        assert_eq!(counters.enqueued, 0);
    }

    #[tokio::test]
    async fn success_marks_ready_and_has_detail() {
        let (_dir, pool) = test_pool().await;
        let summaries = vec![summary("1", "Run", Some(false))];
        crate::store::activities::upsert_summary(&pool, None, &summaries[0])
            .await
            .unwrap();

        let calls = Arc::new(AtomicU64::new(0));
        let counters = auto_import_details(
            &pool,
            cfg(),
            &summaries,
            DetailPolicy::Auto,
            counting_fetch(Arc::clone(&calls)),
        )
        .await
        .unwrap();

        assert_eq!(counters.enqueued, 1);
        assert_eq!(counters.completed, 1);
        assert_eq!(counters.errors, 0);
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        let status = crate::store::details::get_status(&pool, "1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.state, DetailState::Ready);
        assert!(crate::store::activities::get_summary(&pool, "1")
            .await
            .unwrap()
            .unwrap()
            .has_detail);
        assert!(crate::store::details::has_detail(&pool, "1").await.unwrap());
    }

    #[tokio::test]
    async fn retries_stop_after_max_and_mark_error() {
        let (_dir, pool) = test_pool().await;
        let summaries = vec![summary("1", "Ride", Some(false))];

        let calls = Arc::new(AtomicU64::new(0));
        let calls_in = Arc::clone(&calls);
        let failing = move |_id: String| -> std::pin::Pin<Box<dyn Future<Output = Result<Value>> + Send>> {
            calls_in.fetch_add(1, Ordering::Relaxed);
            Box::pin(async move { Err(Error::upstream(500, "make_activity_500")) })
        };

        let counters = auto_import_details(&pool, cfg(), &summaries, DetailPolicy::Auto, failing)
            .await
            .unwrap();

        // 1 initial attempt + retry_max retries
        assert_eq!(calls.load(Ordering::Relaxed), 3);
        assert_eq!(counters.errors, 1);
        assert_eq!(counters.completed, 0);

        let status = crate::store::details::get_status(&pool, "1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.state, DetailState::Error);
        assert_eq!(status.attempts, 3);
        assert!(status.last_error.unwrap().contains("make_activity_500"));
    }

    #[tokio::test]
    async fn auto_skips_cached_but_force_reimports() {
        let (_dir, pool) = test_pool().await;
        let summaries = vec![summary("1", "Run", Some(false))];

        let calls = Arc::new(AtomicU64::new(0));
        let fetch = counting_fetch(Arc::clone(&calls));
        auto_import_details(&pool, cfg(), &summaries, DetailPolicy::Auto, fetch.clone())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        // cached: auto does nothing
        let counters =
            auto_import_details(&pool, cfg(), &summaries, DetailPolicy::Auto, fetch.clone())
                .await
                .unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(counters.enqueued, 0);

        // force: fetches again
        let counters = auto_import_details(&pool, cfg(), &summaries, DetailPolicy::Force, fetch)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 2);
        assert_eq!(counters.completed, 1);
    }

    #[tokio::test]
    async fn detail_for_unknown_activity_synthesizes_summary() {
        let (_dir, pool) = test_pool().await;
        // summary never stored in the index
        let summaries = vec![summary("77", "Run", Some(false))];

        let calls = Arc::new(AtomicU64::new(0));
        auto_import_details(
            &pool,
            cfg(),
            &summaries,
            DetailPolicy::Auto,
            counting_fetch(calls),
        )
        .await
        .unwrap();

        let stored = crate::store::activities::get_summary(&pool, "77")
            .await
            .unwrap()
            .unwrap();
        assert!(stored.has_detail);
    }
}
