//! `harvest verify` command implementation

use harvest_common::Result;
use serde_json::json;

use super::{emit, open};

/// Verify one source, or sweep all of them.
pub async fn run(source_id: Option<i64>) -> Result<()> {
    let harvest = open().await?;

    match source_id {
        Some(source_id) => {
            let report = harvest.integrity.verify_source(source_id).await?;
            emit(&report)
        }
        None => {
            let results = harvest.integrity.verify_all_sources().await?;
            emit(&json!({"sources_checked": results.len(), "results": results}))
        }
    }
}
