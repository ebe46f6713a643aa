// Snapshot artifact types - the on-disk JSON layout of a document backup

use crate::replication::ReplicationResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub timestamp: DateTime<Utc>,
    pub created_by: String,
    pub total_documents: u64,
    pub excluded_documents: u64,
    /// Collection names in catalog order
    pub collections: Vec<String>,
    /// `YYYYMMDD_HHMMSS` form of `timestamp`
    pub backup_id: String,
}

/// A point-in-time copy of the document collections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotArtifact {
    #[serde(rename = "backup_metadata")]
    pub metadata: SnapshotMetadata,
    /// Portable documents per collection
    pub data: BTreeMap<String, Vec<Value>>,
    #[serde(rename = "s3_backup_metadata", default, skip_serializing_if = "Option::is_none")]
    pub replication: Option<ReplicationResult>,
}

impl SnapshotArtifact {
    /// Embed the result of the replication run that accompanied this snapshot
    pub fn with_replication(mut self, result: ReplicationResult) -> Self {
        self.replication = Some(result);
        self
    }

    pub fn backup_id(&self) -> &str {
        &self.metadata.backup_id
    }
}

/// Listing entry for a persisted artifact
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactEntry {
    pub filename: String,
    pub size_bytes: u64,
    pub metadata: SnapshotMetadata,
}
