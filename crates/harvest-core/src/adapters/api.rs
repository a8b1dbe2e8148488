//! REST API adapter
//!
//! Offset-paginated JSON APIs. The cursor is the record offset as a decimal
//! string; pagination parameter names and credentials come from source
//! metadata. Response shapes handled: a top-level array, or an object with
//! the array under `data`/`results`/`items`/`records` (a bare object is
//! treated as a single record).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harvest_common::types::{Page, RawRecord};
use harvest_common::FetchError;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;
use url::Url;

use super::{AdapterSettings, Fetcher, SourceAdapter};

/// Keys probed, in order, for the record array in an object response.
const ARRAY_KEYS: [&str; 4] = ["data", "results", "items", "records"];

/// Keys probed for the total record count in the first-page response.
const TOTAL_KEYS: [&str; 3] = ["total", "count", "total_count"];

pub struct ApiAdapter {
    url: Url,
    fetcher: Arc<Fetcher>,
    settings: AdapterSettings,
}

impl ApiAdapter {
    pub fn new(url: Url, fetcher: Arc<Fetcher>, settings: AdapterSettings) -> Self {
        Self {
            url,
            fetcher,
            settings,
        }
    }

    fn page_url(&self, offset: usize, limit: usize) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair(&self.settings.offset_param, &offset.to_string())
            .append_pair(&self.settings.limit_param, &limit.to_string());
        url
    }

    async fn fetch_json(&self, url: &Url) -> Result<Value, FetchError> {
        let headers = self.settings.auth_headers();
        let response = self.fetcher.get(url, &headers).await?;
        serde_json::from_str(&response.body)
            .map_err(|e| FetchError::Malformed(format!("invalid JSON from {}: {}", url, e)))
    }
}

/// Pull the record array out of whatever shape the API returned.
fn extract_records(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(ref map) => {
            for key in ARRAY_KEYS {
                if let Some(Value::Array(items)) = map.get(key) {
                    return items.clone();
                }
            }
            vec![body]
        }
        other => vec![other],
    }
}

/// Map one JSON record to the uniform record shape.
pub(crate) fn to_raw_record(value: Value) -> RawRecord {
    let identifier = value
        .get("id")
        .or_else(|| value.get("_id"))
        .and_then(json_id);
    let revision = value
        .get("updated_at")
        .or_else(|| value.get("modified"))
        .and_then(|v| v.as_str())
        .map(String::from);
    let published_at = revision
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    RawRecord {
        identifier,
        payload: value,
        revision,
        published_at,
    }
}

fn json_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl SourceAdapter for ApiAdapter {
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<Page, FetchError> {
        let offset: usize = match cursor {
            Some(c) => c
                .parse()
                .map_err(|_| FetchError::Malformed(format!("bad API cursor: {}", c)))?,
            None => 0,
        };
        let limit = self.settings.page_size;

        let body = self.fetch_json(&self.page_url(offset, limit)).await?;
        let records: Vec<RawRecord> = extract_records(body).into_iter().map(to_raw_record).collect();

        // A short page ends the source; a full one may have more behind it.
        let next_cursor = if records.len() < limit {
            None
        } else {
            Some((offset + records.len()).to_string())
        };

        Ok(Page {
            records,
            next_cursor,
            revision: None,
        })
    }

    async fn estimate_total(&self) -> Result<Option<i64>, FetchError> {
        let body = match self.fetch_json(&self.page_url(0, 1)).await {
            Ok(body) => body,
            Err(e) => {
                warn!(url = %self.url, error = %e, "Could not estimate source total");
                return Ok(None);
            }
        };

        if let Value::Object(map) = body {
            for key in TOTAL_KEYS {
                if let Some(total) = map.get(key).and_then(|v| v.as_i64()) {
                    return Ok(Some(total));
                }
            }
        }
        Ok(None)
    }
}
