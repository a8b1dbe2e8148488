//! Storage layer
//!
//! SQLite-backed persistence for sources, raw records, fingerprints,
//! snapshots and change events. All queries are runtime-checked
//! (`sqlx::query`/`query_as` with binds); the schema is applied with
//! `init_schema` at startup.

pub mod changes;
pub mod fingerprints;
pub mod records;
pub mod sources;

use harvest_common::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

use crate::config::DatabaseConfig;

/// Open a connection pool against the configured database.
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(std::time::Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    info!(url = %config.url, "Database pool created");
    Ok(pool)
}

/// Apply the schema. Idempotent; safe to run at every startup.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS data_sources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL UNIQUE,
            source_type TEXT NOT NULL,
            domain TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            total_records INTEGER,
            downloaded_records INTEGER NOT NULL DEFAULT 0,
            cursor TEXT,
            last_successful_download TEXT,
            last_attempt TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS raw_records (
            source_id INTEGER NOT NULL REFERENCES data_sources(id) ON DELETE CASCADE,
            record_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            revision TEXT,
            published_at TEXT,
            fetched_at TEXT NOT NULL,
            PRIMARY KEY (source_id, record_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS data_integrity (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id INTEGER NOT NULL REFERENCES data_sources(id) ON DELETE CASCADE,
            record_id TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            original_hash TEXT,
            verification_status TEXT NOT NULL,
            last_verified TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_data_integrity_source_record
        ON data_integrity(source_id, record_id, id)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id INTEGER NOT NULL REFERENCES data_sources(id) ON DELETE CASCADE,
            snapshot_date TEXT NOT NULL,
            total_records INTEGER NOT NULL,
            records_hash TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_changes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id INTEGER NOT NULL REFERENCES data_sources(id) ON DELETE CASCADE,
            document_id TEXT NOT NULL,
            change_type TEXT NOT NULL,
            old_content_hash TEXT,
            new_content_hash TEXT,
            changed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    /// In-memory pool on a single connection (each `:memory:` connection is
    /// its own database, so the pool must not grow past one).
    pub async fn memory_pool() -> SqlitePool {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        };
        let pool = connect(&config).await.unwrap();
        init_schema(&pool).await.unwrap();
        pool
    }
}
