//! Integrity checker scenarios: stable sources verify clean, changed
//! content surfaces as mismatched, vanished records as missing, and the
//! score denominator rules hold.

mod common;

use common::{test_harvest, write_json_source};
use harvest_common::types::SourceType;
use harvest_core::storage::fingerprints;
use serde_json::json;
use tempfile::TempDir;

#[tokio::test]
async fn test_stable_source_verifies_clean() {
    let dir = TempDir::new().unwrap();
    let harvest = test_harvest(&dir).await;

    let url = write_json_source(
        &dir,
        "registry.json",
        &json!([
            {"id": "a", "title": "Alpha", "body": "first"},
            {"id": "b", "title": "Beta", "body": "second"},
        ]),
    );
    let source_id = harvest
        .downloads
        .register(&url, SourceType::File, json!({}))
        .await
        .unwrap();
    harvest.downloads.resume(source_id, 10).await.unwrap();

    // First pass sees only new records: nothing compared yet, so the score
    // is undefined, not zero.
    let first = harvest.integrity.verify_source(source_id).await.unwrap();
    assert_eq!(first.integrity_score, None);
    assert_eq!(first.extra.len(), 2);
    assert!(first.missing.is_empty() && first.mismatched.is_empty());

    // Second pass with no source-side change verifies everything.
    let second = harvest.integrity.verify_source(source_id).await.unwrap();
    assert_eq!(second.integrity_score, Some(1.0));
    assert_eq!(second.verified_count, 2);
    assert!(second.missing.is_empty());
    assert!(second.mismatched.is_empty());
    assert!(second.extra.is_empty());
    assert!(!second.flagged);
}

#[tokio::test]
async fn test_changed_content_is_mismatched_not_missing() {
    let dir = TempDir::new().unwrap();
    let harvest = test_harvest(&dir).await;

    let url = write_json_source(
        &dir,
        "registry.json",
        &json!([{"id": "a", "title": "Alpha", "body": "original text"}]),
    );
    let source_id = harvest
        .downloads
        .register(&url, SourceType::File, json!({}))
        .await
        .unwrap();
    harvest.downloads.resume(source_id, 10).await.unwrap();
    harvest.integrity.verify_source(source_id).await.unwrap();

    // The source rewrites the record between checks.
    write_json_source(
        &dir,
        "registry.json",
        &json!([{"id": "a", "title": "Alpha", "body": "tampered text"}]),
    );

    let report = harvest.integrity.verify_source(source_id).await.unwrap();
    assert_eq!(report.mismatched.len(), 1);
    assert_eq!(report.mismatched[0].record_id, "a");
    assert_ne!(
        report.mismatched[0].content_hash,
        report.mismatched[0].reference_hash
    );
    assert!(report.missing.is_empty());
    assert!(report.extra.is_empty());
    assert_eq!(report.integrity_score, Some(0.0));
    assert!(report.flagged);
}

#[tokio::test]
async fn test_vanished_record_is_missing() {
    let dir = TempDir::new().unwrap();
    let harvest = test_harvest(&dir).await;

    let url = write_json_source(
        &dir,
        "registry.json",
        &json!([
            {"id": "a", "title": "Alpha"},
            {"id": "b", "title": "Beta"},
        ]),
    );
    let source_id = harvest
        .downloads
        .register(&url, SourceType::File, json!({}))
        .await
        .unwrap();
    harvest.downloads.resume(source_id, 10).await.unwrap();
    harvest.integrity.verify_source(source_id).await.unwrap();

    write_json_source(&dir, "registry.json", &json!([{"id": "a", "title": "Alpha"}]));

    let report = harvest.integrity.verify_source(source_id).await.unwrap();
    assert_eq!(report.missing, vec!["b".to_string()]);
    assert_eq!(report.verified_count, 1);
    assert_eq!(report.integrity_score, Some(0.5));

    // A third pass no longer re-reports the known-missing record.
    let third = harvest.integrity.verify_source(source_id).await.unwrap();
    assert!(third.missing.is_empty());
    assert_eq!(third.integrity_score, Some(1.0));
}

#[tokio::test]
async fn test_every_pass_snapshots_and_keeps_history() {
    let dir = TempDir::new().unwrap();
    let harvest = test_harvest(&dir).await;

    let url = write_json_source(&dir, "registry.json", &json!([{"id": "a", "v": 1}]));
    let source_id = harvest
        .downloads
        .register(&url, SourceType::File, json!({}))
        .await
        .unwrap();
    harvest.downloads.resume(source_id, 10).await.unwrap();

    let first = harvest.integrity.verify_source(source_id).await.unwrap();
    let second = harvest.integrity.verify_source(source_id).await.unwrap();
    assert_ne!(first.snapshot_id, second.snapshot_id);

    let snap = fingerprints::latest_snapshot(&harvest.pool, source_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snap.id, second.snapshot_id);
    assert_eq!(snap.total_records, 1);

    // Two passes, two fingerprint rows: history is superseded, not erased.
    let history = fingerprints::fingerprint_history(&harvest.pool, source_id, "a")
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn test_sweep_isolates_broken_sources() {
    let dir = TempDir::new().unwrap();
    let harvest = test_harvest(&dir).await;

    let good = harvest
        .downloads
        .register(
            &write_json_source(&dir, "good.json", &json!([{"id": "a"}])),
            SourceType::File,
            json!({}),
        )
        .await
        .unwrap();
    harvest.downloads.resume(good, 10).await.unwrap();

    // Registered but never downloadable: no records, nothing to re-fetch.
    let broken = harvest
        .downloads
        .register(
            &format!("file://{}/gone.json", dir.path().display()),
            SourceType::File,
            json!({}),
        )
        .await
        .unwrap();

    let results = harvest.integrity.verify_all_sources().await.unwrap();
    assert_eq!(results.len(), 2);

    let by_id = |id| results.iter().find(|r| r.source_id == id).unwrap();
    assert!(by_id(good).report.is_some());
    assert!(by_id(broken).error.is_some());
}
