//! `harvest task` and `harvest schedule` command implementations

use harvest_common::Result;
use serde_json::json;
use tracing::info;

use super::{emit, open};

/// Run one scheduled task immediately.
pub async fn run_now(name: &str) -> Result<()> {
    let harvest = open().await?;
    let scheduler = harvest.scheduler(None);

    let result = scheduler.run_task_now(name).await?;
    emit(&json!({"task": name, "result": result}))
}

/// Print the task table.
pub async fn status() -> Result<()> {
    let harvest = open().await?;
    let scheduler = harvest.scheduler(None);
    emit(&scheduler.task_status())
}

/// Run the recurring scheduler until interrupted.
pub async fn schedule() -> Result<()> {
    let harvest = open().await?;
    let scheduler = harvest.scheduler(None);
    scheduler.start();
    info!("Scheduler running; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;

    // Let in-flight task runs finish before exiting.
    scheduler.stop().await;
    emit(&scheduler.task_status())
}
