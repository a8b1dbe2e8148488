//! Database operations for the source registry
//!
//! The `data_sources` row is the single mutable shared state per source:
//! status, cursor and progress counters move together, and page commits go
//! through one transaction so a crash never leaves the cursor ahead of the
//! persisted records.

use chrono::{DateTime, Utc};
use harvest_common::types::{Source, SourceStatus, SourceType};
use harvest_common::{HarvestError, Result};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;
use std::str::FromStr;

/// Raw row shape; enums and metadata are decoded in `From<SourceRow>`.
#[derive(Debug, FromRow)]
struct SourceRow {
    id: i64,
    url: String,
    source_type: String,
    domain: String,
    status: String,
    total_records: Option<i64>,
    downloaded_records: i64,
    cursor: Option<String>,
    last_successful_download: Option<DateTime<Utc>>,
    last_attempt: Option<DateTime<Utc>>,
    retry_count: i64,
    last_error: Option<String>,
    metadata: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SourceRow> for Source {
    fn from(row: SourceRow) -> Self {
        Source {
            id: row.id,
            url: row.url,
            source_type: SourceType::from_str(&row.source_type).unwrap_or(SourceType::Api),
            domain: row.domain,
            status: SourceStatus::from(row.status.as_str()),
            total_records: row.total_records,
            downloaded_records: row.downloaded_records,
            cursor: row.cursor,
            last_successful_download: row.last_successful_download,
            last_attempt: row.last_attempt,
            retry_count: row.retry_count,
            last_error: row.last_error,
            metadata: serde_json::from_str(&row.metadata)
                .unwrap_or(serde_json::Value::Object(Default::default())),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, url, source_type, domain, status, total_records,
           downloaded_records, cursor, last_successful_download, last_attempt,
           retry_count, last_error, metadata, created_at, updated_at
    FROM data_sources
"#;

/// Create a new source in status `pending`.
///
/// Fails with `DuplicateSource` when the URL is already registered.
pub async fn create_source(
    pool: &SqlitePool,
    url: &str,
    source_type: SourceType,
    domain: &str,
    metadata: &serde_json::Value,
) -> Result<i64> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO data_sources (url, source_type, domain, status, metadata, created_at, updated_at)
        VALUES (?, ?, ?, 'pending', ?, ?, ?)
        "#,
    )
    .bind(url)
    .bind(source_type.as_str())
    .bind(domain)
    .bind(metadata.to_string())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await;

    match result {
        Ok(done) => Ok(done.last_insert_rowid()),
        Err(e) => {
            if e.as_database_error()
                .map(|d| d.is_unique_violation())
                .unwrap_or(false)
            {
                Err(HarvestError::DuplicateSource(url.to_string()))
            } else {
                Err(e.into())
            }
        }
    }
}

/// Fetch a source by id; `SourceNotFound` if absent.
pub async fn get_source(pool: &SqlitePool, source_id: i64) -> Result<Source> {
    let row: Option<SourceRow> = sqlx::query_as(&format!("{} WHERE id = ?", SELECT_COLUMNS))
        .bind(source_id)
        .fetch_optional(pool)
        .await?;

    row.map(Source::from)
        .ok_or(HarvestError::SourceNotFound(source_id))
}

/// All registered sources, newest first.
pub async fn list_sources(pool: &SqlitePool) -> Result<Vec<Source>> {
    let rows: Vec<SourceRow> = sqlx::query_as(&format!("{} ORDER BY id", SELECT_COLUMNS))
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(Source::from).collect())
}

/// Sources a `resume_all` sweep should pick up: anything not finished and
/// not awaiting operator intervention.
pub async fn list_resumable_sources(pool: &SqlitePool) -> Result<Vec<Source>> {
    let rows: Vec<SourceRow> = sqlx::query_as(&format!(
        "{} WHERE status IN ('pending', 'downloading', 'partial') ORDER BY id",
        SELECT_COLUMNS
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Source::from).collect())
}

/// Sources eligible for verification and change-detection sweeps (everything
/// except `failed`, which needs operator intervention first).
pub async fn list_sweepable_sources(pool: &SqlitePool) -> Result<Vec<Source>> {
    let rows: Vec<SourceRow> = sqlx::query_as(&format!(
        "{} WHERE status != 'failed' ORDER BY id",
        SELECT_COLUMNS
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Source::from).collect())
}

/// Set status; a non-None error is recorded as `last_error`.
pub async fn update_status(
    pool: &SqlitePool,
    source_id: i64,
    status: SourceStatus,
    last_error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE data_sources
        SET status = ?, last_error = COALESCE(?, last_error), updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(last_error)
    .bind(Utc::now())
    .bind(source_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Stamp a fetch attempt.
pub async fn record_attempt(pool: &SqlitePool, source_id: i64) -> Result<()> {
    sqlx::query("UPDATE data_sources SET last_attempt = ?, updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(source_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Bump the retry counter after a transient page failure.
pub async fn increment_retries(pool: &SqlitePool, source_id: i64) -> Result<()> {
    sqlx::query("UPDATE data_sources SET retry_count = retry_count + 1, updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(source_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Reset the retry counter after a successful page.
pub async fn reset_retries(pool: &SqlitePool, source_id: i64) -> Result<()> {
    sqlx::query("UPDATE data_sources SET retry_count = 0, updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(source_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Refresh the discovered total-record estimate.
pub async fn set_total_records(pool: &SqlitePool, source_id: i64, total: i64) -> Result<()> {
    sqlx::query("UPDATE data_sources SET total_records = ?, updated_at = ? WHERE id = ?")
        .bind(total)
        .bind(Utc::now())
        .bind(source_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Replace the free-form metadata document.
pub async fn set_metadata(
    pool: &SqlitePool,
    source_id: i64,
    metadata: &serde_json::Value,
) -> Result<()> {
    sqlx::query("UPDATE data_sources SET metadata = ?, updated_at = ? WHERE id = ?")
        .bind(metadata.to_string())
        .bind(Utc::now())
        .bind(source_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete a source; fingerprints, raw records, snapshots and change events
/// cascade.
pub async fn delete_source(pool: &SqlitePool, source_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM data_sources WHERE id = ?")
        .bind(source_id)
        .execute(pool)
        .await?;
    Ok(())
}
