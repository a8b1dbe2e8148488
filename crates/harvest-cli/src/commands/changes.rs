//! `harvest changes` command implementation

use chrono::{Duration, Utc};
use harvest_common::Result;
use harvest_core::storage::changes;
use serde_json::json;

use super::{emit, open};

/// Show change events from the last `hours` hours.
pub async fn run(source_id: Option<i64>, hours: i64) -> Result<()> {
    let harvest = open().await?;
    let since = Utc::now() - Duration::hours(hours);
    let events = changes::recent_changes(&harvest.pool, source_id, since).await?;

    emit(&json!({
        "since": since,
        "count": events.len(),
        "changes": events,
    }))
}
