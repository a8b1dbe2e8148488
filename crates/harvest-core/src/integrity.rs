//! Content integrity verification
//!
//! Compares the fingerprint store against the current source listing and
//! classifies every record as verified, missing, mismatched or extra. Each
//! pass appends superseding fingerprint rows (history is never deleted) and
//! records an immutable snapshot of the source's aggregate state.

use chrono::{DateTime, Utc};
use harvest_common::canonical::{combined_hash, content_hash};
use harvest_common::types::{Source, VerificationStatus};
use harvest_common::{HarvestError, Result};
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::adapters::{self, Fetcher};
use crate::config::IntegrityConfig;
use crate::storage::{fingerprints, records, sources};

/// One record whose stored fingerprint disagrees with the source.
#[derive(Debug, Clone, Serialize)]
pub struct MismatchedRecord {
    pub record_id: String,
    /// Digest of the record as downloaded
    pub content_hash: String,
    /// Digest derived independently from the source at verification time
    pub reference_hash: String,
}

/// Outcome of one `verify_source` pass.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub source_id: i64,
    /// verified / (verified + missing + mismatched); None when nothing was
    /// compared — never reported as zero.
    pub integrity_score: Option<f64>,
    pub verified_count: u64,
    pub missing: Vec<String>,
    pub mismatched: Vec<MismatchedRecord>,
    /// Records seen for the first time, fingerprinted fresh
    pub extra: Vec<String>,
    pub snapshot_id: i64,
    /// Set when the score fell below the alert threshold; the finding is
    /// reported, never auto-corrected.
    pub flagged: bool,
    pub verified_at: DateTime<Utc>,
}

/// Per-source entry of a `verify_all_sources` sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SourceVerification {
    pub source_id: i64,
    pub url: String,
    pub report: Option<IntegrityReport>,
    pub error: Option<String>,
}

pub struct IntegrityChecker {
    pool: SqlitePool,
    fetcher: Arc<Fetcher>,
    config: IntegrityConfig,
}

impl IntegrityChecker {
    pub fn new(pool: SqlitePool, fetcher: Arc<Fetcher>, config: IntegrityConfig) -> Self {
        Self {
            pool,
            fetcher,
            config,
        }
    }

    /// Verify one source against its fingerprint history.
    #[instrument(skip(self))]
    pub async fn verify_source(&self, source_id: i64) -> Result<IntegrityReport> {
        let source = sources::get_source(&self.pool, source_id).await?;

        let listing = self.current_listing(&source).await?;
        let baseline: BTreeMap<String, String> = fingerprints::latest_fingerprints(&self.pool, source_id)
            .await?
            .into_iter()
            .filter(|fp| fp.verification_status != VerificationStatus::Missing)
            .map(|fp| (fp.record_id, fp.content_hash))
            .collect();

        let mut verified_count = 0u64;
        let mut missing = Vec::new();
        let mut mismatched = Vec::new();
        let mut extra = Vec::new();

        let mut tx = self.pool.begin().await?;

        for (record_id, stored_hash) in &baseline {
            match listing.get(record_id) {
                None => {
                    fingerprints::insert_fingerprint(
                        &mut *tx,
                        source_id,
                        record_id,
                        stored_hash,
                        None,
                        VerificationStatus::Missing,
                    )
                    .await?;
                    missing.push(record_id.clone());
                }
                Some(reference_hash) if reference_hash != stored_hash => {
                    fingerprints::insert_fingerprint(
                        &mut *tx,
                        source_id,
                        record_id,
                        stored_hash,
                        Some(reference_hash),
                        VerificationStatus::Mismatch,
                    )
                    .await?;
                    mismatched.push(MismatchedRecord {
                        record_id: record_id.clone(),
                        content_hash: stored_hash.clone(),
                        reference_hash: reference_hash.clone(),
                    });
                }
                Some(reference_hash) => {
                    fingerprints::insert_fingerprint(
                        &mut *tx,
                        source_id,
                        record_id,
                        stored_hash,
                        Some(reference_hash),
                        VerificationStatus::Verified,
                    )
                    .await?;
                    verified_count += 1;
                }
            }
        }

        // Records only the source knows about yet: fingerprint them fresh.
        for (record_id, reference_hash) in &listing {
            if !baseline.contains_key(record_id) {
                fingerprints::insert_fingerprint(
                    &mut *tx,
                    source_id,
                    record_id,
                    reference_hash,
                    Some(reference_hash),
                    VerificationStatus::Verified,
                )
                .await?;
                extra.push(record_id.clone());
            }
        }

        tx.commit().await?;

        let denominator = verified_count + missing.len() as u64 + mismatched.len() as u64;
        let integrity_score = if denominator == 0 {
            None
        } else {
            Some(verified_count as f64 / denominator as f64)
        };

        let snapshot_id = fingerprints::insert_snapshot(
            &self.pool,
            source_id,
            listing.len() as i64,
            &combined_hash(listing.values()),
        )
        .await?;

        let flagged = integrity_score
            .map(|score| score < self.config.alert_threshold)
            .unwrap_or(false);
        if flagged {
            warn!(
                source_id,
                score = integrity_score.unwrap_or_default(),
                "Integrity score below threshold"
            );
        }

        info!(
            source_id,
            verified = verified_count,
            missing = missing.len(),
            mismatched = mismatched.len(),
            extra = extra.len(),
            "Verification pass complete"
        );

        Ok(IntegrityReport {
            source_id,
            integrity_score,
            verified_count,
            missing,
            mismatched,
            extra,
            snapshot_id,
            flagged,
            verified_at: Utc::now(),
        })
    }

    /// Verify every sweepable source; one source failing never aborts the
    /// sweep.
    pub async fn verify_all_sources(&self) -> Result<Vec<SourceVerification>> {
        let candidates = sources::list_sweepable_sources(&self.pool).await?;
        info!(count = candidates.len(), "Starting verification sweep");

        let mut results = Vec::with_capacity(candidates.len());
        for source in candidates {
            match self.verify_source(source.id).await {
                Ok(report) => results.push(SourceVerification {
                    source_id: source.id,
                    url: source.url,
                    report: Some(report),
                    error: None,
                }),
                Err(e) => {
                    warn!(source_id = source.id, error = %e, "Verification failed for source");
                    results.push(SourceVerification {
                        source_id: source.id,
                        url: source.url,
                        report: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        Ok(results)
    }

    /// The current listing as record_id -> canonical digest.
    ///
    /// Re-fetched from the live source when the adapter supports it; the
    /// stored raw records stand in when it does not or when the re-fetch
    /// fails (store-vs-store comparison).
    async fn current_listing(&self, source: &Source) -> Result<BTreeMap<String, String>> {
        if let Ok(adapter) = adapters::adapter_for(source, self.fetcher.clone(), None) {
            if adapter.supports_refetch() {
                match adapters::fetch_all(adapter.as_ref()).await {
                    Ok(current) => {
                        return Ok(current
                            .into_iter()
                            .map(|r| {
                                let hash = content_hash(&r.payload);
                                (r.identifier.unwrap_or_else(|| hash.clone()), hash)
                            })
                            .collect());
                    }
                    Err(e) => {
                        warn!(
                            source_id = source.id,
                            error = %e,
                            "Re-fetch failed, verifying against stored records"
                        );
                    }
                }
            }
        }

        let stored = records::list_records(&self.pool, source.id).await?;
        if stored.is_empty() {
            return Err(HarvestError::InvalidSource(format!(
                "source {} has no records to verify and cannot be re-fetched",
                source.id
            )));
        }
        Ok(stored
            .into_iter()
            .map(|r| {
                let hash = content_hash(&r.payload);
                (r.record_id, hash)
            })
            .collect())
    }
}
