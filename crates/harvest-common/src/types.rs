//! Shared domain types for sources, records, fingerprints and change events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of external source (closed set; dispatch is by enum, not by
/// reflection over type strings).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Api,
    File,
    Web,
    Rss,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Api => "api",
            SourceType::File => "file",
            SourceType::Web => "web",
            SourceType::Rss => "rss",
        }
    }
}

impl std::str::FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "api" => Ok(SourceType::Api),
            "file" => Ok(SourceType::File),
            "web" => Ok(SourceType::Web),
            "rss" => Ok(SourceType::Rss),
            other => Err(format!("unknown source type: {}", other)),
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Download lifecycle of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Partial,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Pending => "pending",
            SourceStatus::Downloading => "downloading",
            SourceStatus::Completed => "completed",
            SourceStatus::Failed => "failed",
            SourceStatus::Partial => "partial",
        }
    }
}

impl From<&str> for SourceStatus {
    fn from(s: &str) -> Self {
        match s {
            "downloading" => SourceStatus::Downloading,
            "completed" => SourceStatus::Completed,
            "failed" => SourceStatus::Failed,
            "partial" => SourceStatus::Partial,
            _ => SourceStatus::Pending,
        }
    }
}

/// Outcome of the latest verification of one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified,
    Mismatch,
    Missing,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Verified => "verified",
            VerificationStatus::Mismatch => "mismatch",
            VerificationStatus::Missing => "missing",
        }
    }
}

impl From<&str> for VerificationStatus {
    fn from(s: &str) -> Self {
        match s {
            "mismatch" => VerificationStatus::Mismatch,
            "missing" => VerificationStatus::Missing,
            _ => VerificationStatus::Verified,
        }
    }
}

/// Classification of a detected change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Updated => "updated",
            ChangeType::Deleted => "deleted",
        }
    }
}

impl From<&str> for ChangeType {
    fn from(s: &str) -> Self {
        match s {
            "created" => ChangeType::Created,
            "deleted" => ChangeType::Deleted,
            _ => ChangeType::Updated,
        }
    }
}

/// Scheduled task lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// One registered external source (maps to the data_sources table)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub url: String,
    pub source_type: SourceType,
    /// Host the rate limiter budgets against
    pub domain: String,
    pub status: SourceStatus,
    pub total_records: Option<i64>,
    pub downloaded_records: i64,
    /// Opaque adapter-defined resume position; None = start
    pub cursor: Option<String>,
    pub last_successful_download: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub retry_count: i64,
    pub last_error: Option<String>,
    /// Auth config, pagination parameter names, feed revision marker,
    /// change-detection high-water mark
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One record as fetched from a source, before fingerprinting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    /// Source-native identifier when the source provides one; the storage
    /// layer falls back to the canonical content digest
    pub identifier: Option<String>,
    pub payload: serde_json::Value,
    /// Source-issued revision marker (ETag, Last-Modified, modified field)
    pub revision: Option<String>,
    /// Publication time, when the source carries one (feeds)
    pub published_at: Option<DateTime<Utc>>,
}

impl RawRecord {
    pub fn new(identifier: Option<String>, payload: serde_json::Value) -> Self {
        Self {
            identifier,
            payload,
            revision: None,
            published_at: None,
        }
    }
}

/// Result of one `fetch_page` call
#[derive(Debug, Clone)]
pub struct Page {
    /// Records in source order
    pub records: Vec<RawRecord>,
    /// None signals end-of-source
    pub next_cursor: Option<String>,
    /// New source-level revision marker to persist (feeds)
    pub revision: Option<String>,
}

impl Page {
    /// Terminal page carrying nothing, used for 304 Not Modified feeds
    pub fn end() -> Self {
        Self {
            records: Vec::new(),
            next_cursor: None,
            revision: None,
        }
    }
}

/// One verified unit of content (maps to the data_integrity table)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fingerprint {
    pub id: i64,
    pub source_id: i64,
    pub record_id: String,
    pub content_hash: String,
    /// Hash derived independently from the source at verification time
    pub original_hash: Option<String>,
    pub verification_status: VerificationStatus,
    pub last_verified: DateTime<Utc>,
}

/// Immutable aggregate state of a source (maps to the source_snapshots table)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: i64,
    pub source_id: i64,
    pub snapshot_date: DateTime<Utc>,
    pub total_records: i64,
    /// Combined hash over all record hashes
    pub records_hash: String,
}

/// One entry of the append-only change log (maps to the document_changes table)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub source_id: i64,
    pub document_id: String,
    pub change_type: ChangeType,
    pub old_content_hash: Option<String>,
    pub new_content_hash: Option<String>,
    pub changed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_source_type_round_trip() {
        for ty in [SourceType::Api, SourceType::File, SourceType::Web, SourceType::Rss] {
            assert_eq!(SourceType::from_str(ty.as_str()).unwrap(), ty);
        }
        assert!(SourceType::from_str("ftp").is_err());
    }

    #[test]
    fn test_status_as_str_round_trip() {
        for st in [
            SourceStatus::Pending,
            SourceStatus::Downloading,
            SourceStatus::Completed,
            SourceStatus::Failed,
            SourceStatus::Partial,
        ] {
            assert_eq!(SourceStatus::from(st.as_str()), st);
        }
    }
}
