//! Download manager
//!
//! Orchestrates adapters against the source registry. Each successful page
//! commits one transaction — records, cursor, progress counters and any new
//! feed revision marker move together, so a crash between pages never leaves
//! the cursor ahead of the persisted records, and re-delivery of a page is
//! absorbed by the upsert-by-identifier semantics of the record store.

use futures::StreamExt;
use harvest_common::canonical::content_hash;
use harvest_common::types::{Page, Source, SourceStatus, SourceType};
use harvest_common::{FetchError, HarvestError, Result};
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::adapters::{self, domain_of, parse_source_url, Fetcher, SourceAdapter};
use crate::config::{DownloadConfig, HarvestConfig, RetryConfig};
use crate::storage::{records, sources};

/// Result of one `resume` call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DownloadOutcome {
    pub source_id: i64,
    pub status: SourceStatus,
    /// Total records persisted for the source after this run
    pub downloaded_records: i64,
    /// Pages committed by this run
    pub pages: u32,
    /// Records delivered by this run (including re-delivered ones)
    pub fetched_records: u64,
}

/// Per-source mutual exclusion: a second `resume` on the same source is
/// rejected instead of silently racing the cursor.
struct InFlightGuard {
    set: Arc<StdMutex<HashSet<i64>>>,
    source_id: i64,
}

impl InFlightGuard {
    fn claim(set: &Arc<StdMutex<HashSet<i64>>>, source_id: i64) -> Result<Self> {
        let mut in_flight = set.lock().expect("in-flight set poisoned");
        if !in_flight.insert(source_id) {
            return Err(HarvestError::AlreadyInProgress(format!("source {}", source_id)));
        }
        Ok(Self {
            set: set.clone(),
            source_id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.set.lock() {
            in_flight.remove(&self.source_id);
        }
    }
}

pub struct DownloadManager {
    pool: SqlitePool,
    fetcher: Arc<Fetcher>,
    retry: RetryConfig,
    download: DownloadConfig,
    in_flight: Arc<StdMutex<HashSet<i64>>>,
}

impl DownloadManager {
    pub fn new(pool: SqlitePool, fetcher: Arc<Fetcher>, config: &HarvestConfig) -> Self {
        Self {
            pool,
            fetcher,
            retry: config.retry.clone(),
            download: config.download.clone(),
            in_flight: Arc::new(StdMutex::new(HashSet::new())),
        }
    }

    /// Register a new source. Fails with `DuplicateSource` when the URL is
    /// already known.
    pub async fn register(
        &self,
        url: &str,
        source_type: SourceType,
        metadata: Value,
    ) -> Result<i64> {
        if !metadata.is_object() {
            return Err(HarvestError::InvalidSource(
                "source metadata must be a JSON object".to_string(),
            ));
        }
        let parsed = parse_source_url(url)?;
        let domain = domain_of(&parsed);

        let source_id =
            sources::create_source(&self.pool, url, source_type, &domain, &metadata).await?;
        info!(source_id, url = %url, source_type = %source_type, "Registered source");
        Ok(source_id)
    }

    /// Resume (or start) downloading a source.
    pub async fn resume(&self, source_id: i64, batch_size: usize) -> Result<DownloadOutcome> {
        self.resume_with_cancel(source_id, batch_size, CancellationToken::new())
            .await
    }

    /// Resume with a cancellation token. Cancellation is honored between
    /// pages only: the in-flight page finishes (or times out) naturally, and
    /// the stored cursor reflects fully committed pages.
    #[instrument(skip(self, cancel))]
    pub async fn resume_with_cancel(
        &self,
        source_id: i64,
        batch_size: usize,
        cancel: CancellationToken,
    ) -> Result<DownloadOutcome> {
        let _guard = InFlightGuard::claim(&self.in_flight, source_id)?;

        let source = sources::get_source(&self.pool, source_id).await?;
        let adapter = adapters::adapter_for(&source, self.fetcher.clone(), Some(batch_size))?;

        sources::update_status(&self.pool, source_id, SourceStatus::Downloading, None).await?;

        // Fresh start: ask the source how big it is, when it can tell us.
        if source.cursor.is_none() {
            if let Ok(Some(total)) = adapter.estimate_total().await {
                sources::set_total_records(&self.pool, source_id, total).await?;
            }
        }

        let mut cursor = source.cursor.clone();
        let mut metadata = source.metadata.clone();
        let mut pages = 0u32;
        let mut fetched = 0u64;

        let final_status = loop {
            if cancel.is_cancelled() {
                info!(source_id, "Download cancelled, leaving source partial");
                break SourceStatus::Partial;
            }

            let page = match self
                .fetch_page_with_retry(adapter.as_ref(), source_id, cursor.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!(source_id, error = %e, "Download failed");
                    sources::update_status(
                        &self.pool,
                        source_id,
                        SourceStatus::Failed,
                        Some(&e.to_string()),
                    )
                    .await?;
                    return Err(e.into());
                }
            };

            fetched += page.records.len() as u64;
            let next_cursor = page.next_cursor.clone();
            self.commit_page(source_id, &page, &mut metadata).await?;
            sources::reset_retries(&self.pool, source_id).await?;
            pages += 1;

            match next_cursor {
                Some(next) => cursor = Some(next),
                None => break SourceStatus::Completed,
            }
        };

        let downloaded = records::count_records(&self.pool, source_id).await?;
        if final_status == SourceStatus::Completed {
            sources::set_total_records(&self.pool, source_id, downloaded).await?;
        }
        sources::update_status(&self.pool, source_id, final_status, None).await?;

        info!(
            source_id,
            status = final_status.as_str(),
            downloaded,
            pages,
            "Download run finished"
        );

        Ok(DownloadOutcome {
            source_id,
            status: final_status,
            downloaded_records: downloaded,
            pages,
            fetched_records: fetched,
        })
    }

    /// Resume every source a sweep should pick up, bounded by the worker
    /// pool. One source failing does not abort the others.
    pub async fn resume_all(&self, batch_size: usize) -> Result<Vec<(i64, Result<DownloadOutcome>)>> {
        let candidates = sources::list_resumable_sources(&self.pool).await?;
        info!(count = candidates.len(), "Resuming all pending sources");

        let results = futures::stream::iter(candidates)
            .map(|source: Source| async move {
                let outcome = self.resume(source.id, batch_size).await;
                if let Err(ref e) = outcome {
                    warn!(source_id = source.id, error = %e, "Source resume failed in sweep");
                }
                (source.id, outcome)
            })
            .buffer_unordered(self.download.workers.max(1))
            .collect::<Vec<_>>()
            .await;

        Ok(results)
    }

    /// Fetch one page, retrying transient failures with exponential back-off.
    ///
    /// Permanent failures and retry exhaustion are returned to the caller;
    /// the cursor is untouched either way, so a later `resume` retries the
    /// same page.
    async fn fetch_page_with_retry(
        &self,
        adapter: &dyn SourceAdapter,
        source_id: i64,
        cursor: Option<&str>,
    ) -> std::result::Result<Page, FetchError> {
        let mut attempt = 0u32;
        loop {
            if let Err(e) = sources::record_attempt(&self.pool, source_id).await {
                warn!(source_id, error = %e, "Could not stamp attempt");
            }

            match adapter.fetch_page(cursor).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() => {
                    let _ = sources::increment_retries(&self.pool, source_id).await;
                    if attempt >= self.retry.max_retries {
                        return Err(e);
                    }
                    let mut delay = self.retry.delay_for_attempt(attempt);
                    if let FetchError::RateLimited {
                        retry_after_secs: Some(secs),
                    } = &e
                    {
                        delay = delay.max(std::time::Duration::from_secs(*secs));
                    }
                    warn!(
                        source_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient fetch failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Commit one page atomically: records, cursor, progress counters and
    /// any new feed revision marker.
    async fn commit_page(
        &self,
        source_id: i64,
        page: &Page,
        metadata: &mut Value,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for record in &page.records {
            let record_id = record
                .identifier
                .clone()
                .unwrap_or_else(|| content_hash(&record.payload));
            records::upsert_record(
                &mut *tx,
                source_id,
                &record_id,
                &record.payload,
                record.revision.as_deref(),
                record.published_at,
            )
            .await?;
        }

        if let Some(ref revision) = page.revision {
            metadata["feed_revision"] = Value::String(revision.clone());
        }

        let now = chrono::Utc::now();
        sqlx::query(
            r#"
            UPDATE data_sources
            SET cursor = COALESCE(?, cursor),
                downloaded_records = (SELECT COUNT(*) FROM raw_records WHERE source_id = ?),
                last_successful_download = ?,
                metadata = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&page.next_cursor)
        .bind(source_id)
        .bind(now)
        .bind(metadata.to_string())
        .bind(now)
        .bind(source_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
