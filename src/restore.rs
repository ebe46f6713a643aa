//! Snapshot restore.
//!
//! A restore replaces whole collections: existing documents are deleted and
//! the artifact's documents inserted in their place. Collections are handled
//! one after another and a failure only marks the collection it happened in.

use crate::document::normalize::rehydrate;
use crate::document::{Document, DocumentStore};
use crate::snapshot::{ArtifactStore, CollectionCatalog};
use crate::{BackupError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// State of one collection after a restore call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStatus {
    WouldRestore,
    Restored,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRestore {
    /// Documents in the artifact for this collection
    pub count: u64,
    pub status: RestoreStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CollectionRestore {
    fn failed(count: u64, error: String) -> Self {
        Self {
            count,
            status: RestoreStatus::Failed,
            error: Some(error),
        }
    }
}

/// Result of a restore call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreOutcome {
    pub backup_id: String,
    pub dry_run: bool,
    pub restored_collections: BTreeMap<String, CollectionRestore>,
    /// Documents inserted (live) or that would be inserted (dry run)
    pub total_restored: u64,
    pub errors: Vec<String>,
    /// `true` iff `errors` is empty once the restore has finished
    #[serde(default)]
    pub success: bool,
}

impl RestoreOutcome {
    pub fn success(&self) -> bool {
        self.success && self.errors.is_empty()
    }
}

/// Previews or applies a snapshot artifact to the document database
pub struct RestoreOrchestrator {
    documents: Arc<dyn DocumentStore>,
    catalog: CollectionCatalog,
    store: ArtifactStore,
}

impl RestoreOrchestrator {
    pub fn new(documents: Arc<dyn DocumentStore>, catalog: CollectionCatalog, store: ArtifactStore) -> Self {
        Self {
            documents,
            catalog,
            store,
        }
    }

    /// Restore `backup_id`.
    ///
    /// `collections` narrows the run to the named collections; `None` means
    /// every collection present in the artifact. A missing artifact or one
    /// without a `data` object is an error; everything else is reported in
    /// the outcome.
    #[instrument(skip(self, collections))]
    pub async fn restore(
        &self,
        backup_id: &str,
        collections: Option<&[String]>,
        dry_run: bool,
    ) -> Result<RestoreOutcome> {
        let raw = self.store.load_raw(backup_id).await?;
        let data = raw
            .get("data")
            .and_then(Value::as_object)
            .ok_or_else(|| BackupError::InvalidArtifact(format!("{} has no data section", backup_id)))?;

        let targets: Vec<String> = match collections {
            Some(requested) => requested.to_vec(),
            None => data.keys().cloned().collect(),
        };

        info!(backup_id, dry_run, collections = targets.len(), "Starting restore");

        let mut outcome = RestoreOutcome {
            backup_id: backup_id.to_string(),
            dry_run,
            restored_collections: BTreeMap::new(),
            total_restored: 0,
            errors: Vec::new(),
            success: false,
        };

        for name in targets {
            let Some(entry) = data.get(&name) else {
                let message = format!("Collection '{}' not found in backup", name);
                warn!(collection = %name, "Requested collection not found in backup");
                outcome
                    .restored_collections
                    .insert(name, CollectionRestore::failed(0, "not found in backup".to_string()));
                outcome.errors.push(message);
                continue;
            };

            if !self.catalog.contains(&name) {
                warn!(collection = %name, "Skipping unknown collection");
                outcome.errors.push(format!("Unknown collection '{}' skipped", name));
                continue;
            }

            let Some(documents) = entry.as_array() else {
                let message = format!("collection '{}' is not a list of documents", name);
                error!(collection = %name, "Collection in backup is not a list of documents");
                outcome
                    .errors
                    .push(format!("Failed to restore collection '{}': {}", name, message));
                outcome
                    .restored_collections
                    .insert(name, CollectionRestore::failed(0, message));
                continue;
            };
            let count = documents.len() as u64;

            if dry_run {
                outcome.restored_collections.insert(
                    name,
                    CollectionRestore {
                        count,
                        status: RestoreStatus::WouldRestore,
                        error: None,
                    },
                );
                outcome.total_restored += count;
                continue;
            }

            match self.replace_collection(&name, documents).await {
                Ok(inserted) => {
                    info!(collection = %name, documents = inserted, "Collection restored");
                    outcome.total_restored += inserted;
                    outcome.restored_collections.insert(
                        name,
                        CollectionRestore {
                            count: inserted,
                            status: RestoreStatus::Restored,
                            error: None,
                        },
                    );
                }
                Err(message) => {
                    error!(collection = %name, error = %message, "Collection restore failed");
                    outcome
                        .errors
                        .push(format!("Failed to restore collection '{}': {}", name, message));
                    outcome
                        .restored_collections
                        .insert(name, CollectionRestore::failed(count, message));
                }
            }
        }

        outcome.success = outcome.errors.is_empty();
        info!(
            backup_id,
            dry_run,
            total_restored = outcome.total_restored,
            errors = outcome.errors.len(),
            "Restore finished"
        );
        Ok(outcome)
    }

    /// Delete everything in `collection`, then insert `documents`. The delete
    /// runs even when there is nothing to insert.
    async fn replace_collection(&self, collection: &str, documents: &[Value]) -> std::result::Result<u64, String> {
        let native: Vec<Document> = documents
            .iter()
            .enumerate()
            .map(|(index, value)| rehydrate(value).ok_or_else(|| format!("document {} is not an object", index)))
            .collect::<std::result::Result<_, _>>()?;

        let removed = self
            .documents
            .delete_all(collection)
            .await
            .map_err(|e| format!("delete failed: {:#}", e))?;

        if native.is_empty() {
            info!(collection, removed, "Collection emptied");
            return Ok(0);
        }

        let inserted = self
            .documents
            .insert_many(collection, native)
            .await
            .map_err(|e| format!("insert failed: {:#}", e))?;
        Ok(inserted as u64)
    }
}
