//! External collaborator boundaries
//!
//! The core persists raw bytes and hands off identifiers; structuring and
//! dataset versioning happen behind these traits in external services.

use async_trait::async_trait;
use harvest_common::types::ChangeType;
use harvest_common::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of asking the structuring service what a blob of content is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuringAnalysis {
    /// Proposed record schema for the content
    pub schema: Value,
    /// Problems the service noticed (encoding, truncation, mixed content)
    pub issues: Vec<String>,
}

/// LLM-backed content structuring service, consumed by the normalization
/// stage downstream of this core.
#[async_trait]
pub trait Structuring: Send + Sync {
    async fn analyze(&self, raw: &[u8]) -> Result<StructuringAnalysis>;

    async fn extract(&self, raw: &[u8], schema: &Value) -> Result<Vec<Value>>;
}

/// One changed record handed to the dataset-versioning collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeSample {
    pub source_id: i64,
    pub document_id: String,
    pub change_type: ChangeType,
    pub content_hash: Option<String>,
}

/// Dataset version management, consumed by the scheduler's
/// incremental-dataset task.
#[async_trait]
pub trait DatasetVersioning: Send + Sync {
    /// The newest dataset version in state `ready`, if any exists yet.
    async fn latest_ready_version(&self) -> Result<Option<i64>>;

    /// Cut an incremental version on top of `base_version` from the given
    /// changed-record samples; returns the new version id.
    async fn create_incremental(&self, base_version: i64, samples: Vec<ChangeSample>) -> Result<i64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoStructuring;

    #[async_trait]
    impl Structuring for EchoStructuring {
        async fn analyze(&self, raw: &[u8]) -> Result<StructuringAnalysis> {
            Ok(StructuringAnalysis {
                schema: json!({"type": "text"}),
                issues: if raw.is_empty() {
                    vec!["empty input".to_string()]
                } else {
                    Vec::new()
                },
            })
        }

        async fn extract(&self, raw: &[u8], _schema: &Value) -> Result<Vec<Value>> {
            Ok(vec![json!({"text": String::from_utf8_lossy(raw)})])
        }
    }

    #[tokio::test]
    async fn test_structuring_trait_object_round_trip() {
        let service: std::sync::Arc<dyn Structuring> = std::sync::Arc::new(EchoStructuring);

        let analysis = service.analyze(b"decree text").await.unwrap();
        assert!(analysis.issues.is_empty());

        let records = service.extract(b"decree text", &analysis.schema).await.unwrap();
        assert_eq!(records[0]["text"], "decree text");

        let empty = service.analyze(b"").await.unwrap();
        assert_eq!(empty.issues, vec!["empty input".to_string()]);
    }
}
