//! Harvest core library
//!
//! Resumable ingestion of heterogeneous external sources into a durable
//! store, with content-integrity verification, incremental change detection
//! and a periodic scheduler driving both:
//!
//! - **adapters**: uniform paging over {API, File, Web, RSS} sources
//! - **rate_limit**: per-domain rolling-window budgets for every fetch
//! - **download**: the resumable, transactional download manager
//! - **integrity**: fingerprint verification and snapshots
//! - **detector**: created/updated/deleted change events
//! - **scheduler**: the recurring sweep loop
//! - **storage**: the SQLite persistence layer behind all of the above
//! - **collab**: trait boundaries to the external structuring and
//!   dataset-versioning services

pub mod adapters;
pub mod collab;
pub mod config;
pub mod detector;
pub mod download;
pub mod integrity;
pub mod rate_limit;
pub mod scheduler;
pub mod storage;

pub use config::HarvestConfig;
pub use detector::ChangeDetector;
pub use download::DownloadManager;
pub use integrity::IntegrityChecker;
pub use rate_limit::RateLimiter;
pub use scheduler::Scheduler;

use adapters::Fetcher;
use harvest_common::Result;
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;

/// Everything wired together: one handle the CLI (or an embedding service)
/// uses to reach the core subsystems.
pub struct Harvest {
    pub pool: SqlitePool,
    pub downloads: DownloadManager,
    pub integrity: Arc<IntegrityChecker>,
    pub detector: Arc<ChangeDetector>,
    pub config: HarvestConfig,
}

impl Harvest {
    /// Connect to storage, apply the schema and construct the subsystems.
    pub async fn open(config: HarvestConfig) -> Result<Self> {
        let pool = storage::connect(&config.database).await?;
        storage::init_schema(&pool).await?;

        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let fetcher = Arc::new(Fetcher::new(&config.http, limiter)?);

        let downloads = DownloadManager::new(pool.clone(), fetcher.clone(), &config);
        let integrity = Arc::new(IntegrityChecker::new(
            pool.clone(),
            fetcher.clone(),
            config.integrity.clone(),
        ));
        let detector = Arc::new(ChangeDetector::new(pool.clone(), fetcher));

        Ok(Self {
            pool,
            downloads,
            integrity,
            detector,
            config,
        })
    }

    /// A scheduler preloaded with the default task set. The dataset
    /// collaborator is optional; without it the incremental-dataset task is
    /// not registered.
    pub fn scheduler(&self, datasets: Option<Arc<dyn collab::DatasetVersioning>>) -> Scheduler {
        let scheduler = Scheduler::new();
        scheduler.register_default_tasks(
            self.integrity.clone(),
            self.detector.clone(),
            datasets,
            &self.config.scheduler,
        );
        scheduler
    }
}
