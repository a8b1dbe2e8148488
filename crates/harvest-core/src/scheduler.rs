//! Periodic task scheduler
//!
//! An explicit task table driven by one dispatch loop. Task state is
//! inspectable at any time without real timers firing; a task whose interval
//! elapses while it is still running has that tick skipped and logged, never
//! queued behind itself. `stop()` lets in-flight runs finish before the loop
//! exits.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use harvest_common::types::{ChangeType, TaskStatus};
use harvest_common::{HarvestError, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::collab::{ChangeSample, DatasetVersioning};
use crate::config::SchedulerConfig;
use crate::detector::ChangeDetector;
use crate::integrity::IntegrityChecker;

/// A task body: an async closure producing a structured result.
pub type TaskAction = Arc<dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync>;

struct TaskEntry {
    interval: Duration,
    action: TaskAction,
    status: TaskStatus,
    running: bool,
    next_run: Instant,
    last_run_at: Option<DateTime<Utc>>,
    success_count: u64,
    failure_count: u64,
    last_error: Option<String>,
    last_result: Option<Value>,
}

/// Serializable view of one task's state.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub name: String,
    pub status: TaskStatus,
    pub interval_secs: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_error: Option<String>,
}

struct SchedulerInner {
    tasks: StdMutex<HashMap<String, TaskEntry>>,
    cancel: CancellationToken,
}

impl SchedulerInner {
    /// Claim every due task, skipping (and re-arming) ones still running.
    fn claim_due(&self, now: Instant) -> Vec<(String, TaskAction)> {
        let mut tasks = self.tasks.lock().expect("task table poisoned");
        let mut due = Vec::new();
        for (name, entry) in tasks.iter_mut() {
            if now < entry.next_run {
                continue;
            }
            if entry.running {
                warn!(task = %name, "Interval elapsed while task still running, skipping tick");
                entry.next_run = now + entry.interval;
                continue;
            }
            entry.running = true;
            entry.status = TaskStatus::Running;
            due.push((name.clone(), entry.action.clone()));
        }
        due
    }

    /// Claim one task for an on-demand run, bypassing its interval.
    fn claim_now(&self, name: &str) -> Result<TaskAction> {
        let mut tasks = self.tasks.lock().expect("task table poisoned");
        let entry = tasks
            .get_mut(name)
            .ok_or_else(|| HarvestError::TaskNotFound(name.to_string()))?;
        if entry.running {
            return Err(HarvestError::AlreadyInProgress(format!("task {}", name)));
        }
        entry.running = true;
        entry.status = TaskStatus::Running;
        Ok(entry.action.clone())
    }

    fn finish(&self, name: &str, outcome: &Result<Value>) {
        let mut tasks = self.tasks.lock().expect("task table poisoned");
        let Some(entry) = tasks.get_mut(name) else {
            return;
        };
        entry.running = false;
        entry.last_run_at = Some(Utc::now());
        entry.next_run = Instant::now() + entry.interval;
        match outcome {
            Ok(result) => {
                entry.status = TaskStatus::Completed;
                entry.success_count += 1;
                entry.last_result = Some(result.clone());
            }
            Err(e) => {
                entry.status = TaskStatus::Failed;
                entry.failure_count += 1;
                entry.last_error = Some(e.to_string());
            }
        }
    }
}

pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    loop_handle: StdMutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                tasks: StdMutex::new(HashMap::new()),
                cancel: CancellationToken::new(),
            }),
            loop_handle: StdMutex::new(None),
        }
    }

    /// Register a periodic task. The first run is due immediately.
    pub fn register_task(&self, name: &str, interval: Duration, action: TaskAction) {
        let mut tasks = self.inner.tasks.lock().expect("task table poisoned");
        tasks.insert(
            name.to_string(),
            TaskEntry {
                interval,
                action,
                status: TaskStatus::Pending,
                running: false,
                next_run: Instant::now(),
                last_run_at: None,
                success_count: 0,
                failure_count: 0,
                last_error: None,
                last_result: None,
            },
        );
        info!(task = %name, interval_secs = interval.as_secs(), "Registered task");
    }

    /// Remove a task. In-flight runs finish; they just stop being re-armed.
    pub fn unregister_task(&self, name: &str) {
        let mut tasks = self.inner.tasks.lock().expect("task table poisoned");
        if tasks.remove(name).is_some() {
            info!(task = %name, "Unregistered task");
        }
    }

    /// Start the dispatch loop.
    pub fn start(&self) {
        let mut handle = self.loop_handle.lock().expect("loop handle poisoned");
        if handle.is_some() {
            warn!("Scheduler is already running");
            return;
        }

        let inner = self.inner.clone();
        *handle = Some(tokio::spawn(async move {
            info!("Scheduler started");
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut in_flight: JoinSet<()> = JoinSet::new();

            loop {
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        for (name, action) in inner.claim_due(Instant::now()) {
                            let run_id = Uuid::new_v4();
                            let inner = inner.clone();
                            in_flight.spawn(async move {
                                info!(task = %name, %run_id, "Running task");
                                let outcome = action().await;
                                if let Err(ref e) = outcome {
                                    error!(task = %name, %run_id, error = %e, "Task failed");
                                }
                                inner.finish(&name, &outcome);
                            });
                        }
                        // Reap whatever finished; never block the tick.
                        while in_flight.try_join_next().is_some() {}
                    }
                }
            }

            // Graceful shutdown: in-flight tasks run to completion.
            while in_flight.join_next().await.is_some() {}
            info!("Scheduler stopped");
        }));
    }

    /// Stop the loop, waiting for in-flight tasks to finish.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        let handle = {
            let mut guard = self.loop_handle.lock().expect("loop handle poisoned");
            guard.take()
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler loop panicked");
            }
        }
    }

    /// Run a task immediately, bypassing its interval. The single-execution
    /// rule still holds: a running task is rejected with `AlreadyInProgress`.
    pub async fn run_task_now(&self, name: &str) -> Result<Value> {
        let action = self.inner.claim_now(name)?;
        info!(task = %name, "Running task on demand");
        let outcome = action().await;
        self.inner.finish(name, &outcome);
        outcome
    }

    /// Snapshot every task's state, sorted by name.
    pub fn task_status(&self) -> Vec<TaskSnapshot> {
        let tasks = self.inner.tasks.lock().expect("task table poisoned");
        let mut snapshots: Vec<TaskSnapshot> = tasks
            .iter()
            .map(|(name, entry)| TaskSnapshot {
                name: name.clone(),
                status: entry.status,
                interval_secs: entry.interval.as_secs(),
                last_run_at: entry.last_run_at,
                success_count: entry.success_count,
                failure_count: entry.failure_count,
                last_error: entry.last_error.clone(),
            })
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Wire up the standard task set: integrity sweep, change detection and
    /// the incremental-dataset build against the external versioning
    /// collaborator.
    pub fn register_default_tasks(
        &self,
        checker: Arc<IntegrityChecker>,
        detector: Arc<ChangeDetector>,
        datasets: Option<Arc<dyn DatasetVersioning>>,
        config: &SchedulerConfig,
    ) {
        {
            let checker = checker.clone();
            self.register_task(
                "integrity_verification",
                Duration::from_secs(config.verification_interval_secs),
                Arc::new(move || {
                    let checker = checker.clone();
                    Box::pin(async move {
                        let results = checker.verify_all_sources().await?;
                        let flagged = results
                            .iter()
                            .filter(|r| r.report.as_ref().map(|rep| rep.flagged).unwrap_or(false))
                            .count();
                        Ok(json!({
                            "sources_checked": results.len(),
                            "flagged": flagged,
                        }))
                    })
                }),
            );
        }

        {
            let detector = detector.clone();
            self.register_task(
                "change_detection",
                Duration::from_secs(config.change_detection_interval_secs),
                Arc::new(move || {
                    let detector = detector.clone();
                    Box::pin(async move {
                        let results = detector.detect_changes_all_sources().await?;
                        let total: usize = results.iter().map(|r| r.events.len()).sum();
                        let failed = results.iter().filter(|r| r.error.is_some()).count();
                        Ok(json!({
                            "sources_checked": results.len(),
                            "total_changes": total,
                            "failed_sources": failed,
                        }))
                    })
                }),
            );
        }

        if let Some(datasets) = datasets {
            let min_changes = config.min_changes_for_dataset;
            self.register_task(
                "incremental_dataset",
                Duration::from_secs(config.incremental_dataset_interval_secs),
                Arc::new(move || {
                    let detector = detector.clone();
                    let datasets = datasets.clone();
                    Box::pin(async move {
                        let Some(base_version) = datasets.latest_ready_version().await? else {
                            return Ok(json!({"message": "no base dataset version found"}));
                        };

                        let results = detector.detect_changes_all_sources().await?;
                        let samples: Vec<ChangeSample> = results
                            .iter()
                            .flat_map(|r| r.events.iter())
                            .filter(|e| {
                                matches!(e.change_type, ChangeType::Created | ChangeType::Updated)
                            })
                            .map(|e| ChangeSample {
                                source_id: e.source_id,
                                document_id: e.document_id.clone(),
                                change_type: e.change_type,
                                content_hash: e.new_content_hash.clone(),
                            })
                            .collect();

                        if samples.len() < min_changes {
                            return Ok(json!({
                                "message": "not enough changes",
                                "total_changes": samples.len(),
                                "required": min_changes,
                            }));
                        }

                        let new_version = datasets.create_incremental(base_version, samples).await?;
                        Ok(json!({
                            "base_version": base_version,
                            "new_version": new_version,
                        }))
                    })
                }),
            );
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn counting_task(counter: Arc<AtomicU64>) -> TaskAction {
        Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"ok": true}))
            })
        })
    }

    fn failing_task() -> TaskAction {
        Arc::new(|| Box::pin(async { Err(HarvestError::Config("boom".to_string())) }))
    }

    fn slow_task(duration: Duration) -> TaskAction {
        Arc::new(move || {
            Box::pin(async move {
                tokio::time::sleep(duration).await;
                Ok(Value::Null)
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_runs_on_interval() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicU64::new(0));
        scheduler.register_task("tick", Duration::from_secs(10), counting_task(counter.clone()));
        scheduler.start();

        // First run is due immediately; the next two need an interval each.
        tokio::time::sleep(Duration::from_secs(25)).await;
        scheduler.stop().await;

        let runs = counter.load(Ordering::SeqCst);
        assert!((2..=3).contains(&runs), "expected 2-3 runs, got {}", runs);

        let status = &scheduler.task_status()[0];
        assert_eq!(status.status, TaskStatus::Completed);
        assert_eq!(status.success_count, runs);
        assert_eq!(status.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_task_never_halts_scheduler() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicU64::new(0));
        scheduler.register_task("bad", Duration::from_secs(5), failing_task());
        scheduler.register_task("good", Duration::from_secs(5), counting_task(counter.clone()));
        scheduler.start();

        tokio::time::sleep(Duration::from_secs(12)).await;
        scheduler.stop().await;

        assert!(counter.load(Ordering::SeqCst) >= 2);
        let status = scheduler.task_status();
        let bad = status.iter().find(|t| t.name == "bad").unwrap();
        assert_eq!(bad.status, TaskStatus::Failed);
        assert!(bad.failure_count >= 2);
        assert_eq!(bad.last_error.as_deref(), Some("configuration error: boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_tick_is_skipped_not_queued() {
        let scheduler = Scheduler::new();
        // Runs for 30s on a 5s interval: ticks at 5,10,... are skipped.
        scheduler.register_task("slow", Duration::from_secs(5), slow_task(Duration::from_secs(30)));
        scheduler.start();

        tokio::time::sleep(Duration::from_secs(32)).await;
        scheduler.stop().await;

        let status = &scheduler.task_status()[0];
        // One completed run, not a backlog of queued ones.
        assert_eq!(status.success_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_task_now_rejects_concurrent_execution() {
        let scheduler = Scheduler::new();
        scheduler.register_task("slow", Duration::from_secs(3600), slow_task(Duration::from_secs(30)));
        scheduler.start();

        // Let the loop claim the first immediate run.
        tokio::time::sleep(Duration::from_secs(2)).await;
        let err = scheduler.run_task_now("slow").await.unwrap_err();
        assert!(matches!(err, HarvestError::AlreadyInProgress(_)));
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_run_task_now_unknown_task() {
        let scheduler = Scheduler::new();
        let err = scheduler.run_task_now("ghost").await.unwrap_err();
        assert!(matches!(err, HarvestError::TaskNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_in_flight_task() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicU64::new(0));
        let counter2 = counter.clone();
        scheduler.register_task(
            "slow",
            Duration::from_secs(3600),
            Arc::new(move || {
                let counter = counter2.clone();
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Null)
                })
            }),
        );
        scheduler.start();

        // The task is claimed on the first tick; stop while it sleeps.
        tokio::time::sleep(Duration::from_secs(2)).await;
        scheduler.stop().await;

        // stop() returned only after the task finished its work.
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_tasks_wire_up_with_dataset_collaborator() {
        use crate::adapters::Fetcher;
        use crate::collab::{ChangeSample, DatasetVersioning};
        use crate::config::HarvestConfig;
        use crate::storage::test_util::memory_pool;
        use async_trait::async_trait;

        struct StubVersioning {
            base: Option<i64>,
        }

        #[async_trait]
        impl DatasetVersioning for StubVersioning {
            async fn latest_ready_version(&self) -> Result<Option<i64>> {
                Ok(self.base)
            }

            async fn create_incremental(
                &self,
                base_version: i64,
                _samples: Vec<ChangeSample>,
            ) -> Result<i64> {
                Ok(base_version + 1)
            }
        }

        let pool = memory_pool().await;
        let config = HarvestConfig::default();
        let limiter = Arc::new(crate::rate_limit::RateLimiter::new(&config.rate_limit));
        let fetcher = Arc::new(Fetcher::new(&config.http, limiter).unwrap());
        let checker = Arc::new(IntegrityChecker::new(
            pool.clone(),
            fetcher.clone(),
            config.integrity.clone(),
        ));
        let detector = Arc::new(ChangeDetector::new(pool, fetcher));

        let scheduler = Scheduler::new();
        scheduler.register_default_tasks(
            checker,
            detector,
            Some(Arc::new(StubVersioning { base: None })),
            &config.scheduler,
        );

        let names: Vec<String> = scheduler.task_status().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![
                "change_detection".to_string(),
                "incremental_dataset".to_string(),
                "integrity_verification".to_string(),
            ]
        );

        // Empty registry: every default task completes with a clean result.
        let verify = scheduler.run_task_now("integrity_verification").await.unwrap();
        assert_eq!(verify["sources_checked"], 0);

        let detect = scheduler.run_task_now("change_detection").await.unwrap();
        assert_eq!(detect["total_changes"], 0);

        // No base dataset version yet: the task reports it and succeeds.
        let dataset = scheduler.run_task_now("incremental_dataset").await.unwrap();
        assert_eq!(dataset["message"], "no base dataset version found");
    }

    #[tokio::test]
    async fn test_run_task_now_returns_result() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicU64::new(0));
        scheduler.register_task("tick", Duration::from_secs(3600), counting_task(counter.clone()));

        let result = scheduler.run_task_now("tick").await.unwrap();
        assert_eq!(result["ok"], true);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let status = &scheduler.task_status()[0];
        assert_eq!(status.success_count, 1);
        assert_eq!(status.status, TaskStatus::Completed);
    }
}
