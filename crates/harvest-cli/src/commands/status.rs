//! `harvest status` command implementation

use harvest_common::Result;
use harvest_core::storage::sources;
use serde_json::json;

use super::{emit, open};

/// List every registered source with its download progress.
pub async fn run() -> Result<()> {
    let harvest = open().await?;
    let all = sources::list_sources(&harvest.pool).await?;

    let entries: Vec<serde_json::Value> = all
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "url": s.url,
                "type": s.source_type,
                "status": s.status,
                "downloaded_records": s.downloaded_records,
                "total_records": s.total_records,
                "retry_count": s.retry_count,
                "last_successful_download": s.last_successful_download,
                "last_error": s.last_error,
            })
        })
        .collect();

    emit(&json!({"sources": entries}))
}
