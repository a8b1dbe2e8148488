//! `harvest register` command implementation

use harvest_common::types::SourceType;
use harvest_common::{HarvestError, Result};
use serde_json::json;

use super::{emit, open};

/// Register a source and print its id.
pub async fn run(url: &str, source_type: SourceType, metadata: &str) -> Result<()> {
    let metadata: serde_json::Value = serde_json::from_str(metadata)
        .map_err(|e| HarvestError::InvalidSource(format!("metadata is not valid JSON: {}", e)))?;

    let harvest = open().await?;
    let source_id = harvest.downloads.register(url, source_type, metadata).await?;

    emit(&json!({
        "source_id": source_id,
        "url": url,
        "source_type": source_type,
    }))
}
