//! `harvest resume` and `harvest pull` command implementations

use harvest_common::Result;
use serde_json::json;

use super::{emit, open};

/// Resume one source.
pub async fn run(source_id: i64, batch_size: Option<usize>) -> Result<()> {
    let harvest = open().await?;
    let batch_size = batch_size.unwrap_or(harvest.config.download.batch_size);
    let outcome = harvest.downloads.resume(source_id, batch_size).await?;
    emit(&outcome)
}

/// Resume every pending, partial or interrupted source.
pub async fn pull(batch_size: Option<usize>) -> Result<()> {
    let harvest = open().await?;
    let batch_size = batch_size.unwrap_or(harvest.config.download.batch_size);
    let results = harvest.downloads.resume_all(batch_size).await?;

    let entries: Vec<serde_json::Value> = results
        .into_iter()
        .map(|(source_id, outcome)| match outcome {
            Ok(outcome) => json!({"source_id": source_id, "outcome": outcome}),
            Err(e) => json!({"source_id": source_id, "error": e.to_string()}),
        })
        .collect();

    emit(&json!({"sources": entries}))
}
