//! Document snapshots.
//!
//! [`SnapshotOrchestrator`] reads the catalog's collections from the document
//! database, leaves out records tied to transient accounts, normalizes what is
//! left into portable JSON and stores the result as one artifact file per
//! backup. A database failure aborts the whole snapshot; no partial artifact
//! is ever written.

mod catalog;
mod storage;
mod types;

pub use catalog::{CollectionCatalog, CollectionSpec, ExclusionRule};
pub use storage::{artifact_filename, ArtifactStore};
pub use types::{ArtifactEntry, SnapshotArtifact, SnapshotMetadata};

use crate::document::normalize::document_to_portable;
use crate::document::{DocValue, DocumentStore, Filter, ObjectId};
use crate::timestamp::format_generation;
use crate::{BackupError, Result};
use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Creates and persists snapshot artifacts
pub struct SnapshotOrchestrator {
    documents: Arc<dyn DocumentStore>,
    catalog: CollectionCatalog,
    store: ArtifactStore,
}

impl SnapshotOrchestrator {
    pub fn new(documents: Arc<dyn DocumentStore>, catalog: CollectionCatalog, store: ArtifactStore) -> Self {
        Self {
            documents,
            catalog,
            store,
        }
    }

    pub fn catalog(&self) -> &CollectionCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Capture and persist a snapshot taken now
    pub async fn create_snapshot(&self, initiator: &str) -> Result<SnapshotArtifact> {
        let artifact = self.capture(initiator, Utc::now()).await?;
        self.persist(&artifact).await?;
        Ok(artifact)
    }

    /// Read every catalog collection into an artifact stamped with `at`
    /// without writing it.
    #[instrument(skip(self), fields(collections = self.catalog.collections().len()))]
    pub async fn capture(&self, initiator: &str, at: DateTime<Utc>) -> Result<SnapshotArtifact> {
        let at = at.trunc_subsecs(0);
        let backup_id = format_generation(at);
        info!(backup_id = %backup_id, created_by = initiator, "Starting document snapshot");

        let transient_ids = self.transient_account_ids().await?;
        debug!(transient_accounts = transient_ids.len(), "Resolved transient accounts");

        let mut data = BTreeMap::new();
        let mut total_documents = 0u64;
        let mut excluded_documents = 0u64;

        for spec in self.catalog.collections() {
            let include = self.catalog.inclusion_filter(spec, &transient_ids);

            let excluded = if include == Filter::All {
                0
            } else {
                self.documents
                    .count(&spec.name, &include.clone().negate())
                    .await
                    .map_err(|e| database_error(&spec.name, e))?
            };

            let documents = self
                .documents
                .find(&spec.name, &include)
                .await
                .map_err(|e| database_error(&spec.name, e))?;

            let portable: Vec<Value> = documents
                .iter()
                .map(|document| Value::Object(document_to_portable(document)))
                .collect();

            debug!(collection = %spec.name, documents = portable.len(), excluded, "Captured collection");
            total_documents += portable.len() as u64;
            excluded_documents += excluded;
            data.insert(spec.name.clone(), portable);
        }

        info!(
            backup_id = %backup_id,
            total_documents,
            excluded_documents,
            "Document snapshot captured"
        );

        Ok(SnapshotArtifact {
            metadata: SnapshotMetadata {
                timestamp: at,
                created_by: initiator.to_string(),
                total_documents,
                excluded_documents,
                collections: self.catalog.names(),
                backup_id,
            },
            data,
            replication: None,
        })
    }

    /// Write `artifact` under the artifact root
    pub async fn persist(&self, artifact: &SnapshotArtifact) -> Result<PathBuf> {
        let path = self.store.persist(artifact).await?;
        info!(backup_id = %artifact.backup_id(), path = %path.display(), "Snapshot artifact written");
        Ok(path)
    }

    async fn transient_account_ids(&self) -> Result<Vec<ObjectId>> {
        let user_collection = self.catalog.user_collection();
        let accounts = self
            .documents
            .find(user_collection, &self.catalog.transient_accounts())
            .await
            .map_err(|e| database_error(user_collection, e))?;

        Ok(accounts
            .iter()
            .filter_map(|account| account.get("_id").and_then(DocValue::referenced_id))
            .collect())
    }
}

fn database_error(collection: &str, error: anyhow::Error) -> BackupError {
    BackupError::Database(format!("reading collection '{}' failed: {:#}", collection, error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, MemoryDocumentStore};
    use chrono::TimeZone;

    fn account(id: ObjectId, transient: bool) -> Document {
        let mut doc = Document::new();
        doc.insert("_id".to_string(), id.into());
        doc.insert("is_temporary".to_string(), transient.into());
        doc
    }

    #[tokio::test]
    async fn test_capture_excludes_transient_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let documents = MemoryDocumentStore::new();
        let kept = ObjectId::new();
        let transient = ObjectId::new();
        documents.seed("user", vec![account(kept, false), account(transient, true)]);

        let orchestrator = SnapshotOrchestrator::new(
            Arc::new(documents),
            CollectionCatalog::default(),
            ArtifactStore::new(dir.path()),
        );
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 2, 3, 4).unwrap();
        let artifact = orchestrator.capture("ops", at).await.unwrap();

        assert_eq!(artifact.backup_id(), "20240301_020304");
        assert_eq!(artifact.metadata.total_documents, 1);
        assert_eq!(artifact.metadata.excluded_documents, 1);
        assert_eq!(artifact.data["user"][0]["_id"], Value::String(kept.to_hex()));
        assert_eq!(artifact.data["report"], Vec::<Value>::new());
    }

    #[tokio::test]
    async fn test_read_failure_aborts_without_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let documents = MemoryDocumentStore::new();
        documents.fail_reads("table");

        let orchestrator = SnapshotOrchestrator::new(
            Arc::new(documents),
            CollectionCatalog::default(),
            ArtifactStore::new(dir.path()),
        );
        let err = orchestrator.create_snapshot("ops").await.unwrap_err();
        assert!(matches!(err, BackupError::Database(_)));
        assert!(orchestrator.store().list().await.unwrap().is_empty());
    }
}
