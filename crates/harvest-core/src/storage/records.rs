//! Database operations for raw downloaded records
//!
//! Records are upserted by (source_id, record_id), which makes duplicate
//! page delivery after a crash idempotent.

use chrono::{DateTime, Utc};
use harvest_common::Result;
use sqlx::sqlite::SqlitePool;
use sqlx::{Executor, FromRow, Sqlite};

/// One persisted record with its ingestion metadata.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub record_id: String,
    pub payload: serde_json::Value,
    pub revision: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct RecordRow {
    record_id: String,
    payload: String,
    revision: Option<String>,
    published_at: Option<DateTime<Utc>>,
    fetched_at: DateTime<Utc>,
}

impl From<RecordRow> for StoredRecord {
    fn from(row: RecordRow) -> Self {
        StoredRecord {
            record_id: row.record_id,
            payload: serde_json::from_str(&row.payload).unwrap_or(serde_json::Value::Null),
            revision: row.revision,
            published_at: row.published_at,
            fetched_at: row.fetched_at,
        }
    }
}

/// Insert or replace one record. Takes any executor so page commits can run
/// it inside the cursor-advancing transaction.
pub async fn upsert_record<'e, E>(
    executor: E,
    source_id: i64,
    record_id: &str,
    payload: &serde_json::Value,
    revision: Option<&str>,
    published_at: Option<DateTime<Utc>>,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO raw_records (source_id, record_id, payload, revision, published_at, fetched_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (source_id, record_id) DO UPDATE SET
            payload = excluded.payload,
            revision = excluded.revision,
            published_at = excluded.published_at,
            fetched_at = excluded.fetched_at
        "#,
    )
    .bind(source_id)
    .bind(record_id)
    .bind(payload.to_string())
    .bind(revision)
    .bind(published_at)
    .bind(Utc::now())
    .execute(executor)
    .await?;
    Ok(())
}

/// All persisted records for a source, in record_id order.
pub async fn list_records(pool: &SqlitePool, source_id: i64) -> Result<Vec<StoredRecord>> {
    let rows: Vec<RecordRow> = sqlx::query_as(
        r#"
        SELECT record_id, payload, revision, published_at, fetched_at
        FROM raw_records
        WHERE source_id = ?
        ORDER BY record_id
        "#,
    )
    .bind(source_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(StoredRecord::from).collect())
}

/// Number of persisted records for a source.
pub async fn count_records(pool: &SqlitePool, source_id: i64) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM raw_records WHERE source_id = ?")
        .bind(source_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}
