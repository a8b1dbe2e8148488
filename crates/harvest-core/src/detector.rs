//! Incremental change detection
//!
//! Diffs the current source listing against the latest known fingerprints
//! and emits created/updated/deleted events into the append-only change log.
//! Detected state is folded back into the fingerprint store, so a second run
//! with no intervening source change yields no events.

use chrono::{DateTime, Utc};
use harvest_common::canonical::{combined_hash, content_hash};
use harvest_common::types::{ChangeEvent, ChangeType, RawRecord, Source, SourceType, VerificationStatus};
use harvest_common::Result;
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{self, Fetcher};
use crate::storage::{changes, fingerprints, sources};

/// Metadata key holding the RSS high-water mark (RFC 3339).
const HIGH_WATER_KEY: &str = "change_high_water";

/// Per-source entry of a `detect_changes_all_sources` sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SourceChanges {
    pub source_id: i64,
    pub url: String,
    pub events: Vec<ChangeEvent>,
    pub error: Option<String>,
}

pub struct ChangeDetector {
    pool: SqlitePool,
    fetcher: Arc<Fetcher>,
}

impl ChangeDetector {
    pub fn new(pool: SqlitePool, fetcher: Arc<Fetcher>) -> Self {
        Self { pool, fetcher }
    }

    /// Detect changes in one source since the last detection run.
    #[instrument(skip(self))]
    pub async fn detect_changes(&self, source_id: i64) -> Result<Vec<ChangeEvent>> {
        let source = sources::get_source(&self.pool, source_id).await?;

        let events = if source.source_type == SourceType::Rss {
            self.detect_feed_changes(&source).await?
        } else {
            self.detect_listing_changes(&source).await?
        };

        if !events.is_empty() {
            changes::append_changes(&self.pool, &events).await?;
            let mut created = 0;
            let mut updated = 0;
            let mut deleted = 0;
            for event in &events {
                match event.change_type {
                    ChangeType::Created => created += 1,
                    ChangeType::Updated => updated += 1,
                    ChangeType::Deleted => deleted += 1,
                }
            }
            info!(source_id, created, updated, deleted, "Changes detected");
        }

        Ok(events)
    }

    /// Detect changes across every sweepable source; a failure on one source
    /// is recorded per source and never aborts the others.
    pub async fn detect_changes_all_sources(&self) -> Result<Vec<SourceChanges>> {
        let candidates = sources::list_sweepable_sources(&self.pool).await?;
        info!(count = candidates.len(), "Starting change-detection sweep");

        let mut results = Vec::with_capacity(candidates.len());
        for source in candidates {
            match self.detect_changes(source.id).await {
                Ok(events) => results.push(SourceChanges {
                    source_id: source.id,
                    url: source.url,
                    events,
                    error: None,
                }),
                Err(e) => {
                    warn!(source_id = source.id, error = %e, "Change detection failed for source");
                    results.push(SourceChanges {
                        source_id: source.id,
                        url: source.url,
                        events: Vec::new(),
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        Ok(results)
    }

    /// Identifier diff for listing-shaped sources, with the whole-snapshot
    /// fallback when the source carries no stable identifiers.
    async fn detect_listing_changes(&self, source: &Source) -> Result<Vec<ChangeEvent>> {
        let adapter = adapters::adapter_for(source, self.fetcher.clone(), None)?;
        let current = adapters::fetch_all(adapter.as_ref()).await?;

        let has_identifiers = current.iter().any(|r| r.identifier.is_some());
        if !has_identifiers {
            return self.detect_snapshot_changes(source, &current).await;
        }

        let baseline: HashMap<String, String> = fingerprints::latest_fingerprints(&self.pool, source.id)
            .await?
            .into_iter()
            .filter(|fp| fp.verification_status != VerificationStatus::Missing)
            .map(|fp| (fp.record_id, fp.content_hash))
            .collect();

        let now = Utc::now();
        let mut events = Vec::new();
        let mut seen: HashMap<String, String> = HashMap::with_capacity(current.len());

        let mut tx = self.pool.begin().await?;
        for record in current {
            let hash = content_hash(&record.payload);
            let record_id = record.identifier.unwrap_or_else(|| hash.clone());
            seen.insert(record_id.clone(), hash.clone());

            match baseline.get(&record_id) {
                None => {
                    fingerprints::insert_fingerprint(
                        &mut *tx,
                        source.id,
                        &record_id,
                        &hash,
                        Some(&hash),
                        VerificationStatus::Verified,
                    )
                    .await?;
                    events.push(ChangeEvent {
                        source_id: source.id,
                        document_id: record_id,
                        change_type: ChangeType::Created,
                        old_content_hash: None,
                        new_content_hash: Some(hash),
                        changed_at: now,
                    });
                }
                Some(old_hash) if *old_hash != hash => {
                    fingerprints::insert_fingerprint(
                        &mut *tx,
                        source.id,
                        &record_id,
                        &hash,
                        Some(&hash),
                        VerificationStatus::Verified,
                    )
                    .await?;
                    events.push(ChangeEvent {
                        source_id: source.id,
                        document_id: record_id,
                        change_type: ChangeType::Updated,
                        old_content_hash: Some(old_hash.clone()),
                        new_content_hash: Some(hash),
                        changed_at: now,
                    });
                }
                Some(_) => {}
            }
        }

        for (record_id, old_hash) in &baseline {
            if !seen.contains_key(record_id) {
                fingerprints::insert_fingerprint(
                    &mut *tx,
                    source.id,
                    record_id,
                    old_hash,
                    None,
                    VerificationStatus::Missing,
                )
                .await?;
                events.push(ChangeEvent {
                    source_id: source.id,
                    document_id: record_id.clone(),
                    change_type: ChangeType::Deleted,
                    old_content_hash: Some(old_hash.clone()),
                    new_content_hash: None,
                    changed_at: now,
                });
            }
        }
        tx.commit().await?;

        Ok(events)
    }

    /// Whole-snapshot comparison: per-record attribution is impossible, so
    /// any difference is one aggregate event.
    async fn detect_snapshot_changes(
        &self,
        source: &Source,
        current: &[RawRecord],
    ) -> Result<Vec<ChangeEvent>> {
        let current_hash = combined_hash(current.iter().map(|r| content_hash(&r.payload)));
        let previous = fingerprints::latest_snapshot(&self.pool, source.id).await?;

        let event = match previous {
            None => Some(ChangeEvent {
                source_id: source.id,
                document_id: format!("source:{}", source.id),
                change_type: ChangeType::Created,
                old_content_hash: None,
                new_content_hash: Some(current_hash.clone()),
                changed_at: Utc::now(),
            }),
            Some(ref snap) if snap.records_hash != current_hash => Some(ChangeEvent {
                source_id: source.id,
                document_id: format!("source:{}", source.id),
                change_type: ChangeType::Updated,
                old_content_hash: Some(snap.records_hash.clone()),
                new_content_hash: Some(current_hash.clone()),
                changed_at: Utc::now(),
            }),
            Some(_) => None,
        };

        if event.is_some() {
            fingerprints::insert_snapshot(&self.pool, source.id, current.len() as i64, &current_hash)
                .await?;
        }

        Ok(event.into_iter().collect())
    }

    /// RSS fast path: feeds are append-mostly and timestamped, so the scan
    /// short-circuits at the first entry published at or before the stored
    /// high-water mark. Deletions are not inferred for feeds.
    async fn detect_feed_changes(&self, source: &Source) -> Result<Vec<ChangeEvent>> {
        // The conditional-fetch marker belongs to the download manager's
        // resume path; detection always reads the full feed.
        let mut detect_source = source.clone();
        if let Some(map) = detect_source.metadata.as_object_mut() {
            map.remove("feed_revision");
        }
        let adapter = adapters::adapter_for(&detect_source, self.fetcher.clone(), None)?;
        let page = adapter.fetch_page(None).await?;

        let mut entries = page.records;
        // Newest first; entries without a publication time sort last and are
        // always examined.
        entries.sort_by(|a, b| b.published_at.cmp(&a.published_at));

        let high_water = source
            .metadata
            .get(HIGH_WATER_KEY)
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let baseline: HashMap<String, String> = fingerprints::latest_fingerprints(&self.pool, source.id)
            .await?
            .into_iter()
            .filter(|fp| fp.verification_status != VerificationStatus::Missing)
            .map(|fp| (fp.record_id, fp.content_hash))
            .collect();

        let now = Utc::now();
        let mut events = Vec::new();
        let mut newest_seen = high_water;

        let mut tx = self.pool.begin().await?;
        for entry in entries {
            if let (Some(mark), Some(published)) = (high_water, entry.published_at) {
                if published <= mark {
                    debug!(source_id = source.id, "Reached high-water mark, stopping feed scan");
                    break;
                }
            }

            let hash = content_hash(&entry.payload);
            let entry_id = entry.identifier.unwrap_or_else(|| hash.clone());
            if let Some(published) = entry.published_at {
                if newest_seen.map(|m| published > m).unwrap_or(true) {
                    newest_seen = Some(published);
                }
            }

            match baseline.get(&entry_id) {
                None => {
                    fingerprints::insert_fingerprint(
                        &mut *tx,
                        source.id,
                        &entry_id,
                        &hash,
                        Some(&hash),
                        VerificationStatus::Verified,
                    )
                    .await?;
                    events.push(ChangeEvent {
                        source_id: source.id,
                        document_id: entry_id,
                        change_type: ChangeType::Created,
                        old_content_hash: None,
                        new_content_hash: Some(hash),
                        changed_at: now,
                    });
                }
                Some(old_hash) if *old_hash != hash => {
                    fingerprints::insert_fingerprint(
                        &mut *tx,
                        source.id,
                        &entry_id,
                        &hash,
                        Some(&hash),
                        VerificationStatus::Verified,
                    )
                    .await?;
                    events.push(ChangeEvent {
                        source_id: source.id,
                        document_id: entry_id,
                        change_type: ChangeType::Updated,
                        old_content_hash: Some(old_hash.clone()),
                        new_content_hash: Some(hash),
                        changed_at: now,
                    });
                }
                Some(_) => {}
            }
        }
        tx.commit().await?;

        // Advance the high-water mark past everything examined this run.
        if newest_seen != high_water {
            if let Some(mark) = newest_seen {
                let mut metadata = source.metadata.clone();
                metadata[HIGH_WATER_KEY] = serde_json::Value::String(mark.to_rfc3339());
                sources::set_metadata(&self.pool, source.id, &metadata).await?;
            }
        }

        Ok(events)
    }
}
