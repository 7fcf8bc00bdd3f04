//! Activity summary storage and the recency page index
//!
//! Summaries are stored as canonical JSON with typed side columns for the
//! keyset index. Pagination uses an opaque `"{start_epoch_ms}|{activity_id}"`
//! cursor, strictly descending, so concurrent ingestion can never shift a
//! page under the reader.

use paceline_common::model::ActivitySummary;
use paceline_common::{time, Error, Result};
use sqlx::SqlitePool;

/// Page size bounds for list endpoints.
pub const MIN_PAGE_SIZE: i64 = 1;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Clamp a requested page size into the allowed range.
pub fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
}

/// One page of summaries plus the cursor for the next page.
#[derive(Debug)]
pub struct SummaryPage {
    pub items: Vec<ActivitySummary>,
    pub next_cursor: Option<String>,
}

/// Filters applied to the recency page scan.
#[derive(Debug, Default, Clone)]
pub struct PageFilter {
    pub user_id: Option<i64>,
    pub sport_type: Option<String>,
}

fn parse_cursor(cursor: &str) -> Result<(i64, String)> {
    let (epoch, id) = cursor
        .split_once('|')
        .ok_or_else(|| Error::InvalidInput(format!("malformed cursor: {cursor}")))?;
    let epoch: i64 = epoch
        .parse()
        .map_err(|_| Error::InvalidInput(format!("malformed cursor: {cursor}")))?;
    if id.is_empty() {
        return Err(Error::InvalidInput(format!("malformed cursor: {cursor}")));
    }
    Ok((epoch, id.to_string()))
}

fn format_cursor(start_epoch_ms: i64, activity_id: &str) -> String {
    format!("{start_epoch_ms}|{activity_id}")
}

/// Upsert a summary under its canonical id.
pub async fn upsert_summary(
    db: &SqlitePool,
    user_id: Option<i64>,
    summary: &ActivitySummary,
) -> Result<()> {
    let start_epoch_ms = time::iso_to_epoch_ms(&summary.date)
        .ok_or_else(|| Error::InvalidInput(format!("unparseable date: {}", summary.date)))?;
    let json = serde_json::to_string(summary)
        .map_err(|e| Error::Internal(format!("serialize summary: {e}")))?;

    sqlx::query(
        "INSERT INTO activities
            (activity_id, user_id, start_epoch_ms, sport_type, commute, has_detail, summary)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(activity_id) DO UPDATE SET
            user_id = COALESCE(excluded.user_id, activities.user_id),
            start_epoch_ms = excluded.start_epoch_ms,
            sport_type = excluded.sport_type,
            commute = excluded.commute,
            has_detail = excluded.has_detail,
            summary = excluded.summary",
    )
    .bind(&summary.activity_id)
    .bind(user_id)
    .bind(start_epoch_ms)
    .bind(&summary.kind)
    .bind(summary.commute)
    .bind(summary.has_detail)
    .bind(json)
    .execute(db)
    .await
    .map_err(|e| Error::Database(e.to_string()))?;
    Ok(())
}

/// Fetch one summary by id.
pub async fn get_summary(db: &SqlitePool, activity_id: &str) -> Result<Option<ActivitySummary>> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT summary FROM activities WHERE activity_id = ?")
            .bind(activity_id)
            .fetch_optional(db)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
    match row {
        Some((json,)) => {
            let summary = serde_json::from_str(&json)
                .map_err(|e| Error::Internal(format!("corrupt summary blob: {e}")))?;
            Ok(Some(summary))
        }
        None => Ok(None),
    }
}

/// True when the summary index already knows this id.
pub async fn has_summary(db: &SqlitePool, activity_id: &str) -> Result<bool> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM activities WHERE activity_id = ?")
            .bind(activity_id)
            .fetch_optional(db)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
    Ok(row.is_some())
}

/// Flip the summary's has-detail flag, in the blob and the index column.
///
/// Returns false when no summary exists for the id.
pub async fn mark_has_detail(db: &SqlitePool, activity_id: &str) -> Result<bool> {
    let Some(mut summary) = get_summary(db, activity_id).await? else {
        return Ok(false);
    };
    if !summary.has_detail {
        summary.has_detail = true;
        upsert_summary(db, None, &summary).await?;
    }
    Ok(true)
}

/// One recency-ordered page, newest first, optionally filtered.
pub async fn page(
    db: &SqlitePool,
    limit: i64,
    cursor: Option<&str>,
    filter: &PageFilter,
) -> Result<SummaryPage> {
    let limit = clamp_limit(limit);

    let mut sql = String::from(
        "SELECT summary, start_epoch_ms, activity_id FROM activities",
    );
    let mut clauses: Vec<&str> = Vec::new();

    let cursor = cursor.map(parse_cursor).transpose()?;
    if cursor.is_some() {
        clauses.push("(start_epoch_ms < ? OR (start_epoch_ms = ? AND activity_id < ?))");
    }
    if filter.sport_type.is_some() {
        clauses.push("sport_type = ?");
    }
    if filter.user_id.is_some() {
        clauses.push("user_id = ?");
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY start_epoch_ms DESC, activity_id DESC LIMIT ?");

    let mut query = sqlx::query_as::<_, (String, i64, String)>(&sql);
    if let Some((epoch, ref id)) = cursor {
        query = query.bind(epoch).bind(epoch).bind(id.clone());
    }
    if let Some(kind) = &filter.sport_type {
        query = query.bind(kind);
    }
    if let Some(user_id) = filter.user_id {
        query = query.bind(user_id);
    }
    query = query.bind(limit);

    let rows = query
        .fetch_all(db)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

    let next_cursor = if rows.len() as i64 == limit {
        rows.last()
            .map(|(_, epoch, id)| format_cursor(*epoch, id))
    } else {
        None
    };

    let mut items = Vec::with_capacity(rows.len());
    for (json, _, _) in rows {
        let summary: ActivitySummary = serde_json::from_str(&json)
            .map_err(|e| Error::Internal(format!("corrupt summary blob: {e}")))?;
        items.push(summary);
    }

    Ok(SummaryPage { items, next_cursor })
}
