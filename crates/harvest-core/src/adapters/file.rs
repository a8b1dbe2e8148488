//! Static file adapter
//!
//! JSON or CSV documents served over HTTP or from a `file://` URL. The whole
//! file is fetched and parsed once per adapter instance (an explicit
//! per-instance cache, not ambient state) and the cursor is a row index into
//! the parsed records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harvest_common::types::{Page, RawRecord};
use harvest_common::FetchError;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::OnceCell;
use url::Url;

use super::api::to_raw_record;
use super::{AdapterSettings, Fetcher, SourceAdapter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    Json,
    Csv,
}

pub struct FileAdapter {
    url: Url,
    fetcher: Arc<Fetcher>,
    settings: AdapterSettings,
    cache: OnceCell<Vec<RawRecord>>,
}

impl FileAdapter {
    pub fn new(url: Url, fetcher: Arc<Fetcher>, settings: AdapterSettings) -> Self {
        Self {
            url,
            fetcher,
            settings,
            cache: OnceCell::new(),
        }
    }

    fn format_from_url(&self) -> Option<FileFormat> {
        let path = self.url.path().to_lowercase();
        if path.ends_with(".csv") {
            Some(FileFormat::Csv)
        } else if path.ends_with(".json") {
            Some(FileFormat::Json)
        } else {
            None
        }
    }

    async fn records(&self) -> Result<&Vec<RawRecord>, FetchError> {
        self.cache.get_or_try_init(|| self.load()).await
    }

    /// Fetch the file and parse it into records.
    async fn load(&self) -> Result<Vec<RawRecord>, FetchError> {
        let (body, revision, content_type) = if self.url.scheme() == "file" {
            let path = self
                .url
                .to_file_path()
                .map_err(|_| FetchError::Malformed(format!("bad file URL: {}", self.url)))?;
            let body = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| FetchError::Unreachable(format!("cannot read {}: {}", path.display(), e)))?;
            let revision = std::fs::metadata(&path)
                .ok()
                .and_then(|m| m.modified().ok())
                .map(|mtime| DateTime::<Utc>::from(mtime).to_rfc3339());
            (body, revision, None)
        } else {
            let response = self.fetcher.get(&self.url, &self.settings.auth_headers()).await?;
            let revision = response.last_modified.clone().or(response.etag.clone());
            (response.body, revision, response.content_type)
        };

        let format = self.format_from_url().unwrap_or_else(|| {
            match content_type.as_deref() {
                Some(ct) if ct.contains("csv") => FileFormat::Csv,
                _ => FileFormat::Json,
            }
        });

        let mut records = match format {
            FileFormat::Json => parse_json(&body)?,
            FileFormat::Csv => parse_csv(&body)?,
        };

        // Records without their own revision inherit the file-level marker.
        if let Some(rev) = revision {
            for record in &mut records {
                if record.revision.is_none() {
                    record.revision = Some(rev.clone());
                }
            }
        }

        Ok(records)
    }
}

fn parse_json(body: &str) -> Result<Vec<RawRecord>, FetchError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| FetchError::Malformed(format!("invalid JSON file: {}", e)))?;
    let items = match value {
        Value::Array(items) => items,
        other => vec![other],
    };
    Ok(items.into_iter().map(to_raw_record).collect())
}

fn parse_csv(body: &str) -> Result<Vec<RawRecord>, FetchError> {
    let mut reader = csv::Reader::from_reader(body.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| FetchError::Malformed(format!("invalid CSV header: {}", e)))?
        .clone();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| FetchError::Malformed(format!("invalid CSV row: {}", e)))?;
        let mut object = serde_json::Map::new();
        for (header, field) in headers.iter().zip(row.iter()) {
            object.insert(header.to_string(), Value::String(field.to_string()));
        }
        records.push(to_raw_record(Value::Object(object)));
    }
    Ok(records)
}

#[async_trait]
impl SourceAdapter for FileAdapter {
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<Page, FetchError> {
        let offset: usize = match cursor {
            Some(c) => c
                .parse()
                .map_err(|_| FetchError::Malformed(format!("bad file cursor: {}", c)))?,
            None => 0,
        };
        let all = self.records().await?;
        let end = (offset + self.settings.page_size).min(all.len());
        let records = all.get(offset..end).unwrap_or(&[]).to_vec();

        let next_cursor = if end < all.len() {
            Some(end.to_string())
        } else {
            None
        };

        Ok(Page {
            records,
            next_cursor,
            revision: None,
        })
    }

    async fn estimate_total(&self) -> Result<Option<i64>, FetchError> {
        Ok(Some(self.records().await?.len() as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_array() {
        let records = parse_json(r#"[{"id": "a", "v": 1}, {"id": "b", "v": 2}]"#).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].identifier.as_deref(), Some("a"));
    }

    #[test]
    fn test_parse_json_single_object() {
        let records = parse_json(r#"{"id": "only"}"#).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_parse_json_garbage_is_malformed() {
        assert!(matches!(parse_json("{not json"), Err(FetchError::Malformed(_))));
    }

    #[test]
    fn test_parse_csv_uses_headers_as_fields() {
        let records = parse_csv("id,name\n1,alpha\n2,beta\n").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].identifier.as_deref(), Some("1"));
        assert_eq!(records[1].payload["name"], "beta");
    }
}
