//! `harvest detect` command implementation

use harvest_common::Result;
use serde_json::json;

use super::{emit, open};

/// Detect changes in one source, or sweep all of them.
pub async fn run(source_id: Option<i64>) -> Result<()> {
    let harvest = open().await?;

    match source_id {
        Some(source_id) => {
            let events = harvest.detector.detect_changes(source_id).await?;
            emit(&json!({"source_id": source_id, "changes": events}))
        }
        None => {
            let results = harvest.detector.detect_changes_all_sources().await?;
            let total: usize = results.iter().map(|r| r.events.len()).sum();
            emit(&json!({
                "sources_checked": results.len(),
                "total_changes": total,
                "results": results,
            }))
        }
    }
}
