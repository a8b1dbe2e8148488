//! Change detector scenarios: identifier diffs, the whole-snapshot
//! fallback, the RSS high-water fast path and sweep isolation.

mod common;

use chrono::Utc;
use common::{test_harvest, write_json_source};
use harvest_common::types::{ChangeType, SourceType};
use harvest_core::storage::{changes, sources};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_created_updated_deleted_by_identifier() {
    let dir = TempDir::new().unwrap();
    let harvest = test_harvest(&dir).await;

    let url = write_json_source(
        &dir,
        "registry.json",
        &json!([
            {"id": "a", "title": "Alpha", "body": "one"},
            {"id": "b", "title": "Beta", "body": "two"},
        ]),
    );
    let source_id = harvest
        .downloads
        .register(&url, SourceType::File, json!({}))
        .await
        .unwrap();
    harvest.downloads.resume(source_id, 10).await.unwrap();

    // First run: everything is new.
    let first = harvest.detector.detect_changes(source_id).await.unwrap();
    assert_eq!(first.len(), 2);
    assert!(first.iter().all(|e| e.change_type == ChangeType::Created));

    // No intervening change: the second run is silent.
    let second = harvest.detector.detect_changes(source_id).await.unwrap();
    assert!(second.is_empty());

    // a changes, b disappears, c appears.
    write_json_source(
        &dir,
        "registry.json",
        &json!([
            {"id": "a", "title": "Alpha", "body": "one amended"},
            {"id": "c", "title": "Gamma", "body": "three"},
        ]),
    );

    let third = harvest.detector.detect_changes(source_id).await.unwrap();
    assert_eq!(third.len(), 3);
    let of = |ty: ChangeType| third.iter().find(|e| e.change_type == ty).unwrap();
    assert_eq!(of(ChangeType::Updated).document_id, "a");
    assert!(of(ChangeType::Updated).old_content_hash.is_some());
    assert_eq!(of(ChangeType::Deleted).document_id, "b");
    assert!(of(ChangeType::Deleted).new_content_hash.is_none());
    assert_eq!(of(ChangeType::Created).document_id, "c");

    // Stable again.
    let fourth = harvest.detector.detect_changes(source_id).await.unwrap();
    assert!(fourth.is_empty());

    // Everything landed in the append-only log.
    let logged = changes::recent_changes(
        &harvest.pool,
        Some(source_id),
        Utc::now() - chrono::Duration::hours(1),
    )
    .await
    .unwrap();
    assert_eq!(logged.len(), 5);
}

#[tokio::test]
async fn test_identifierless_source_falls_back_to_snapshot_diff() {
    let dir = TempDir::new().unwrap();
    let harvest = test_harvest(&dir).await;

    // No id fields anywhere: per-record attribution is impossible.
    let url = write_json_source(
        &dir,
        "plain.json",
        &json!([{"title": "row one"}, {"title": "row two"}]),
    );
    let source_id = harvest
        .downloads
        .register(&url, SourceType::File, json!({}))
        .await
        .unwrap();
    harvest.downloads.resume(source_id, 10).await.unwrap();

    let first = harvest.detector.detect_changes(source_id).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].change_type, ChangeType::Created);
    assert_eq!(first[0].document_id, format!("source:{}", source_id));

    let second = harvest.detector.detect_changes(source_id).await.unwrap();
    assert!(second.is_empty());

    write_json_source(
        &dir,
        "plain.json",
        &json!([{"title": "row one"}, {"title": "row two, amended"}]),
    );

    let third = harvest.detector.detect_changes(source_id).await.unwrap();
    assert_eq!(third.len(), 1);
    assert_eq!(third[0].change_type, ChangeType::Updated);
    assert!(third[0].old_content_hash.is_some());
    assert_ne!(third[0].old_content_hash, third[0].new_content_hash);
}

fn feed_with(entries: &[(&str, &str, &str)]) -> String {
    let items: String = entries
        .iter()
        .map(|(guid, title, date)| {
            format!(
                "<item><guid>{}</guid><title>{}</title><pubDate>{}</pubDate></item>",
                guid, title, date
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Feed</title>{}</channel></rss>"#,
        items
    )
}

#[tokio::test]
async fn test_rss_fast_path_short_circuits_at_high_water() {
    let dir = TempDir::new().unwrap();
    let harvest = test_harvest(&dir).await;
    let server = MockServer::start().await;

    let v1 = feed_with(&[
        ("urn:2", "Second", "Mon, 04 May 2026 10:00:00 GMT"),
        ("urn:1", "First", "Sun, 03 May 2026 10:00:00 GMT"),
    ]);
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(v1, "application/rss+xml"))
        .up_to_n_times(2)
        .mount(&server)
        .await;

    let source_id = harvest
        .downloads
        .register(&format!("{}/feed.xml", server.uri()), SourceType::Rss, json!({}))
        .await
        .unwrap();

    let first = harvest.detector.detect_changes(source_id).await.unwrap();
    assert_eq!(first.len(), 2);
    assert!(first.iter().all(|e| e.change_type == ChangeType::Created));

    let source = sources::get_source(&harvest.pool, source_id).await.unwrap();
    let mark = source.metadata["change_high_water"].as_str().unwrap();
    assert!(mark.starts_with("2026-05-04"));

    // Unchanged feed: the scan stops at the high-water mark immediately.
    let second = harvest.detector.detect_changes(source_id).await.unwrap();
    assert!(second.is_empty());

    // One newer entry appears; only it is reported.
    let v2 = feed_with(&[
        ("urn:3", "Third", "Tue, 05 May 2026 09:00:00 GMT"),
        ("urn:2", "Second", "Mon, 04 May 2026 10:00:00 GMT"),
        ("urn:1", "First", "Sun, 03 May 2026 10:00:00 GMT"),
    ]);
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(v2, "application/rss+xml"))
        .mount(&server)
        .await;

    let third = harvest.detector.detect_changes(source_id).await.unwrap();
    assert_eq!(third.len(), 1);
    assert_eq!(third[0].document_id, "urn:3");
    assert_eq!(third[0].change_type, ChangeType::Created);

    let source = sources::get_source(&harvest.pool, source_id).await.unwrap();
    let mark = source.metadata["change_high_water"].as_str().unwrap();
    assert!(mark.starts_with("2026-05-05"));
}

#[tokio::test]
async fn test_sweep_isolates_failing_source() {
    let dir = TempDir::new().unwrap();
    let harvest = test_harvest(&dir).await;

    let good = harvest
        .downloads
        .register(
            &write_json_source(&dir, "good.json", &json!([{"id": "a", "v": 1}])),
            SourceType::File,
            json!({}),
        )
        .await
        .unwrap();
    harvest.downloads.resume(good, 10).await.unwrap();

    let bad = harvest
        .downloads
        .register(
            &format!("file://{}/gone.json", dir.path().display()),
            SourceType::File,
            json!({}),
        )
        .await
        .unwrap();

    let results = harvest.detector.detect_changes_all_sources().await.unwrap();
    assert_eq!(results.len(), 2);

    let by_id = |id| results.iter().find(|r| r.source_id == id).unwrap();
    assert_eq!(by_id(good).events.len(), 1);
    assert!(by_id(good).error.is_none());
    assert!(by_id(bad).error.is_some());
    assert!(by_id(bad).events.is_empty());
}
