//! Database operations for the append-only change log

use chrono::{DateTime, Utc};
use harvest_common::types::{ChangeEvent, ChangeType};
use harvest_common::Result;
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;

#[derive(Debug, FromRow)]
struct ChangeRow {
    source_id: i64,
    document_id: String,
    change_type: String,
    old_content_hash: Option<String>,
    new_content_hash: Option<String>,
    changed_at: DateTime<Utc>,
}

impl From<ChangeRow> for ChangeEvent {
    fn from(row: ChangeRow) -> Self {
        ChangeEvent {
            source_id: row.source_id,
            document_id: row.document_id,
            change_type: ChangeType::from(row.change_type.as_str()),
            old_content_hash: row.old_content_hash,
            new_content_hash: row.new_content_hash,
            changed_at: row.changed_at,
        }
    }
}

/// Append a batch of change events in one transaction.
pub async fn append_changes(pool: &SqlitePool, events: &[ChangeEvent]) -> Result<()> {
    if events.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for event in events {
        sqlx::query(
            r#"
            INSERT INTO document_changes
                (source_id, document_id, change_type, old_content_hash, new_content_hash, changed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.source_id)
        .bind(&event.document_id)
        .bind(event.change_type.as_str())
        .bind(&event.old_content_hash)
        .bind(&event.new_content_hash)
        .bind(event.changed_at)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Change events since `since`, optionally scoped to one source, newest
/// first.
pub async fn recent_changes(
    pool: &SqlitePool,
    source_id: Option<i64>,
    since: DateTime<Utc>,
) -> Result<Vec<ChangeEvent>> {
    let rows: Vec<ChangeRow> = match source_id {
        Some(sid) => {
            sqlx::query_as(
                r#"
                SELECT source_id, document_id, change_type, old_content_hash,
                       new_content_hash, changed_at
                FROM document_changes
                WHERE changed_at > ? AND source_id = ?
                ORDER BY changed_at DESC, id DESC
                "#,
            )
            .bind(since)
            .bind(sid)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as(
                r#"
                SELECT source_id, document_id, change_type, old_content_hash,
                       new_content_hash, changed_at
                FROM document_changes
                WHERE changed_at > ?
                ORDER BY changed_at DESC, id DESC
                "#,
            )
            .bind(since)
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows.into_iter().map(ChangeEvent::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sources::create_source;
    use crate::storage::test_util::memory_pool;
    use chrono::Duration;
    use harvest_common::types::SourceType;
    use serde_json::json;

    fn event(source_id: i64, doc: &str, ty: ChangeType) -> ChangeEvent {
        ChangeEvent {
            source_id,
            document_id: doc.to_string(),
            change_type: ty,
            old_content_hash: None,
            new_content_hash: Some("h".to_string()),
            changed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_and_filter_by_source() {
        let pool = memory_pool().await;
        let a = create_source(&pool, "https://a.example/x", SourceType::Api, "a.example", &json!({}))
            .await
            .unwrap();
        let b = create_source(&pool, "https://b.example/x", SourceType::Api, "b.example", &json!({}))
            .await
            .unwrap();

        append_changes(
            &pool,
            &[
                event(a, "doc-1", ChangeType::Created),
                event(a, "doc-2", ChangeType::Updated),
                event(b, "doc-9", ChangeType::Deleted),
            ],
        )
        .await
        .unwrap();

        let since = Utc::now() - Duration::hours(1);
        assert_eq!(recent_changes(&pool, None, since).await.unwrap().len(), 3);
        assert_eq!(recent_changes(&pool, Some(a), since).await.unwrap().len(), 2);
        assert_eq!(recent_changes(&pool, Some(b), since).await.unwrap().len(), 1);
    }
}
