//! Database operations for fingerprints and snapshots
//!
//! Fingerprints are append-only: every re-verification inserts a superseding
//! row, so the verification history of a record is retained. The "latest"
//! fingerprint per (source_id, record_id) is the row with the greatest id.

use chrono::{DateTime, Utc};
use harvest_common::types::{Fingerprint, Snapshot, VerificationStatus};
use harvest_common::Result;
use sqlx::sqlite::SqlitePool;
use sqlx::{Executor, FromRow, Sqlite};

#[derive(Debug, FromRow)]
struct FingerprintRow {
    id: i64,
    source_id: i64,
    record_id: String,
    content_hash: String,
    original_hash: Option<String>,
    verification_status: String,
    last_verified: DateTime<Utc>,
}

impl From<FingerprintRow> for Fingerprint {
    fn from(row: FingerprintRow) -> Self {
        Fingerprint {
            id: row.id,
            source_id: row.source_id,
            record_id: row.record_id,
            content_hash: row.content_hash,
            original_hash: row.original_hash,
            verification_status: VerificationStatus::from(row.verification_status.as_str()),
            last_verified: row.last_verified,
        }
    }
}

/// Append one fingerprint row.
pub async fn insert_fingerprint<'e, E>(
    executor: E,
    source_id: i64,
    record_id: &str,
    content_hash: &str,
    original_hash: Option<&str>,
    status: VerificationStatus,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO data_integrity
            (source_id, record_id, content_hash, original_hash, verification_status, last_verified)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(source_id)
    .bind(record_id)
    .bind(content_hash)
    .bind(original_hash)
    .bind(status.as_str())
    .bind(Utc::now())
    .execute(executor)
    .await?;
    Ok(())
}

/// Latest fingerprint per record for a source (superseded rows excluded).
pub async fn latest_fingerprints(pool: &SqlitePool, source_id: i64) -> Result<Vec<Fingerprint>> {
    let rows: Vec<FingerprintRow> = sqlx::query_as(
        r#"
        SELECT f.id, f.source_id, f.record_id, f.content_hash, f.original_hash,
               f.verification_status, f.last_verified
        FROM data_integrity f
        JOIN (
            SELECT record_id, MAX(id) AS max_id
            FROM data_integrity
            WHERE source_id = ?
            GROUP BY record_id
        ) latest ON latest.max_id = f.id
        ORDER BY f.record_id
        "#,
    )
    .bind(source_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Fingerprint::from).collect())
}

/// Full verification history of one record, oldest first.
pub async fn fingerprint_history(
    pool: &SqlitePool,
    source_id: i64,
    record_id: &str,
) -> Result<Vec<Fingerprint>> {
    let rows: Vec<FingerprintRow> = sqlx::query_as(
        r#"
        SELECT id, source_id, record_id, content_hash, original_hash,
               verification_status, last_verified
        FROM data_integrity
        WHERE source_id = ? AND record_id = ?
        ORDER BY id
        "#,
    )
    .bind(source_id)
    .bind(record_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Fingerprint::from).collect())
}

/// Record an immutable snapshot of a source's aggregate state.
pub async fn insert_snapshot(
    pool: &SqlitePool,
    source_id: i64,
    total_records: i64,
    records_hash: &str,
) -> Result<i64> {
    let done = sqlx::query(
        r#"
        INSERT INTO source_snapshots (source_id, snapshot_date, total_records, records_hash)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(source_id)
    .bind(Utc::now())
    .bind(total_records)
    .bind(records_hash)
    .execute(pool)
    .await?;
    Ok(done.last_insert_rowid())
}

/// Most recent snapshot for a source, if any.
pub async fn latest_snapshot(pool: &SqlitePool, source_id: i64) -> Result<Option<Snapshot>> {
    #[derive(FromRow)]
    struct SnapshotRow {
        id: i64,
        source_id: i64,
        snapshot_date: DateTime<Utc>,
        total_records: i64,
        records_hash: String,
    }

    let row: Option<SnapshotRow> = sqlx::query_as(
        r#"
        SELECT id, source_id, snapshot_date, total_records, records_hash
        FROM source_snapshots
        WHERE source_id = ?
        ORDER BY id DESC
        LIMIT 1
        "#,
    )
    .bind(source_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| Snapshot {
        id: r.id,
        source_id: r.source_id,
        snapshot_date: r.snapshot_date,
        total_records: r.total_records,
        records_hash: r.records_hash,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sources::create_source;
    use crate::storage::test_util::memory_pool;
    use harvest_common::types::SourceType;
    use serde_json::json;

    #[tokio::test]
    async fn test_reverification_supersedes_without_deleting() {
        let pool = memory_pool().await;
        let sid = create_source(&pool, "https://x.example/d", SourceType::Api, "x.example", &json!({}))
            .await
            .unwrap();

        insert_fingerprint(&pool, sid, "doc-1", "aaa", Some("aaa"), VerificationStatus::Verified)
            .await
            .unwrap();
        insert_fingerprint(&pool, sid, "doc-1", "bbb", Some("ccc"), VerificationStatus::Mismatch)
            .await
            .unwrap();

        let latest = latest_fingerprints(&pool, sid).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].content_hash, "bbb");
        assert_eq!(latest[0].verification_status, VerificationStatus::Mismatch);

        let history = fingerprint_history(&pool, sid, "doc-1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content_hash, "aaa");
    }

    #[tokio::test]
    async fn test_latest_snapshot_picks_newest() {
        let pool = memory_pool().await;
        let sid = create_source(&pool, "https://x.example/d", SourceType::Api, "x.example", &json!({}))
            .await
            .unwrap();

        insert_snapshot(&pool, sid, 10, "hash-1").await.unwrap();
        insert_snapshot(&pool, sid, 12, "hash-2").await.unwrap();

        let snap = latest_snapshot(&pool, sid).await.unwrap().unwrap();
        assert_eq!(snap.total_records, 12);
        assert_eq!(snap.records_hash, "hash-2");
    }

    #[tokio::test]
    async fn test_no_snapshot_yet() {
        let pool = memory_pool().await;
        let sid = create_source(&pool, "https://x.example/d", SourceType::Api, "x.example", &json!({}))
            .await
            .unwrap();
        assert!(latest_snapshot(&pool, sid).await.unwrap().is_none());
    }
}
