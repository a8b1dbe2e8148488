//! Shared test harness: an on-disk SQLite database in a temp directory and
//! a configuration tuned for fast tests (tiny back-off delays, generous
//! rate budget).

use harvest_core::config::{
    DatabaseConfig, DownloadConfig, HarvestConfig, HttpConfig, IntegrityConfig, RateLimitConfig,
    RetryConfig, SchedulerConfig,
};
use harvest_core::Harvest;
use tempfile::TempDir;

pub fn test_config(dir: &TempDir) -> HarvestConfig {
    HarvestConfig {
        database: DatabaseConfig {
            url: format!("sqlite://{}/harvest.db?mode=rwc", dir.path().display()),
            max_connections: 5,
        },
        http: HttpConfig {
            timeout_secs: 5,
            user_agent: "harvest-tests/0.1".to_string(),
        },
        rate_limit: RateLimitConfig {
            max_requests: 1000,
            window_secs: 60,
        },
        retry: RetryConfig {
            max_retries: 3,
            base_delay_ms: 10,
            max_delay_ms: 50,
        },
        download: DownloadConfig {
            batch_size: 10,
            workers: 4,
        },
        integrity: IntegrityConfig {
            alert_threshold: 0.95,
        },
        scheduler: SchedulerConfig {
            verification_interval_secs: 3600,
            change_detection_interval_secs: 3600,
            incremental_dataset_interval_secs: 3600,
            min_changes_for_dataset: 2,
        },
    }
}

pub async fn test_harvest(dir: &TempDir) -> Harvest {
    Harvest::open(test_config(dir)).await.expect("test harvest opens")
}

/// Write a JSON file into the temp dir and return its file:// URL.
pub fn write_json_source(dir: &TempDir, name: &str, content: &serde_json::Value) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, serde_json::to_string_pretty(content).expect("serializable"))
        .expect("fixture written");
    format!("file://{}", path.display())
}
