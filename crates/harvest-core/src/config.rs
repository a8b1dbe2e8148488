//! Configuration management

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default database URL (on-disk SQLite next to the working directory).
pub const DEFAULT_DATABASE_URL: &str = "sqlite://harvest.db?mode=rwc";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default per-request HTTP timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Default User-Agent sent to sources.
pub const DEFAULT_USER_AGENT: &str = "harvest/0.1";

/// Default requests allowed per rolling window, per domain.
pub const DEFAULT_RATE_LIMIT_REQUESTS: u32 = 60;

/// Default rolling window length in seconds.
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Default page size for `resume`.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default retry attempts for transient fetch failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base back-off delay in milliseconds (doubles per attempt).
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;

/// Default back-off cap in milliseconds.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;

/// Default bound on concurrent per-source downloads in `resume_all`.
pub const DEFAULT_DOWNLOAD_WORKERS: usize = 4;

/// Integrity score below which a source is flagged.
pub const DEFAULT_INTEGRITY_ALERT_THRESHOLD: f64 = 0.95;

/// Minimum created/updated events before an incremental dataset is cut.
pub const DEFAULT_MIN_CHANGES_FOR_DATASET: usize = 100;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    pub database: DatabaseConfig,
    pub http: HttpConfig,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    pub download: DownloadConfig,
    pub integrity: IntegrityConfig,
    pub scheduler: SchedulerConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

/// Per-domain request budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum grants per rolling window, per domain
    pub max_requests: u32,
    /// Rolling window length in seconds
    pub window_secs: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Back-off policy for transient fetch failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryConfig {
    /// Delay before retry `attempt` (0-based): base doubling, capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.max_delay_ms);
        Duration::from_millis(exp)
    }
}

/// Download manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    pub batch_size: usize,
    /// Bound on concurrent sources in `resume_all`
    pub workers: usize,
}

/// Integrity checker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityConfig {
    /// Scores below this are flagged in the sweep report
    pub alert_threshold: f64,
}

/// Scheduler intervals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub verification_interval_secs: u64,
    pub change_detection_interval_secs: u64,
    pub incremental_dataset_interval_secs: u64,
    pub min_changes_for_dataset: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            },
            http: HttpConfig {
                timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
                user_agent: DEFAULT_USER_AGENT.to_string(),
            },
            rate_limit: RateLimitConfig {
                max_requests: DEFAULT_RATE_LIMIT_REQUESTS,
                window_secs: DEFAULT_RATE_LIMIT_WINDOW_SECS,
            },
            retry: RetryConfig {
                max_retries: DEFAULT_MAX_RETRIES,
                base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
                max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            },
            download: DownloadConfig {
                batch_size: DEFAULT_BATCH_SIZE,
                workers: DEFAULT_DOWNLOAD_WORKERS,
            },
            integrity: IntegrityConfig {
                alert_threshold: DEFAULT_INTEGRITY_ALERT_THRESHOLD,
            },
            scheduler: SchedulerConfig {
                verification_interval_secs: 24 * 3600,
                change_detection_interval_secs: 6 * 3600,
                incremental_dataset_interval_secs: 24 * 3600,
                min_changes_for_dataset: DEFAULT_MIN_CHANGES_FOR_DATASET,
            },
        }
    }
}

impl HarvestConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(url) = std::env::var("HARVEST_DATABASE_URL") {
            config.database.url = url;
        }
        if let Some(n) = env_parse("HARVEST_DATABASE_MAX_CONNECTIONS") {
            config.database.max_connections = n;
        }
        if let Some(n) = env_parse("HARVEST_HTTP_TIMEOUT_SECS") {
            config.http.timeout_secs = n;
        }
        if let Ok(ua) = std::env::var("HARVEST_USER_AGENT") {
            config.http.user_agent = ua;
        }
        if let Some(n) = env_parse("HARVEST_RATE_LIMIT_REQUESTS") {
            config.rate_limit.max_requests = n;
        }
        if let Some(n) = env_parse("HARVEST_RATE_LIMIT_WINDOW_SECS") {
            config.rate_limit.window_secs = n;
        }
        if let Some(n) = env_parse("HARVEST_MAX_RETRIES") {
            config.retry.max_retries = n;
        }
        if let Some(n) = env_parse("HARVEST_BATCH_SIZE") {
            config.download.batch_size = n;
        }
        if let Some(n) = env_parse("HARVEST_DOWNLOAD_WORKERS") {
            config.download.workers = n;
        }

        config
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HarvestConfig::default();
        assert_eq!(config.rate_limit.max_requests, DEFAULT_RATE_LIMIT_REQUESTS);
        assert_eq!(config.download.batch_size, DEFAULT_BATCH_SIZE);
        assert!(config.database.url.starts_with("sqlite"));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let retry = RetryConfig {
            max_retries: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        };
        assert_eq!(retry.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(retry.delay_for_attempt(10), Duration::from_millis(30_000));
    }
}
