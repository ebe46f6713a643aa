// Backup service - operator-facing create, list, validate, restore and cleanup

use crate::config::{BackupConfig, ConfigError};
use crate::document::DocumentStore;
use crate::lock::BackupLock;
use crate::object_store::ObjectStore;
use crate::replication::{ReplicationResult, ReplicationStrategyManager};
use crate::restore::{RestoreOrchestrator, RestoreOutcome};
use crate::retention::{CleanupReport, RetentionCleaner, RetentionPolicy};
use crate::snapshot::{ArtifactStore, CollectionCatalog, SnapshotOrchestrator};
use crate::timestamp::format_generation;
use crate::{BackupError, Result};
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Supplies the object-store locations replicated with each backup
#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn locations(&self) -> anyhow::Result<Vec<String>>;
}

/// Fixed list of locations
#[derive(Debug, Clone, Default)]
pub struct StaticLocations(Vec<String>);

impl StaticLocations {
    pub fn new<I, S>(locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(locations.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl LocationSource for StaticLocations {
    async fn locations(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

/// Outcome of validating one artifact
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub total_documents: u64,
    pub valid_documents: u64,
    pub invalid_documents: u64,
    pub collections_validated: Vec<String>,
    pub errors: Vec<String>,
}

/// Checks the contents of a snapshot artifact
#[async_trait]
pub trait ArtifactValidator: Send + Sync {
    async fn validate(&self, artifact: &Value) -> ValidationReport;
}

/// Shape checks that need no knowledge of the collections' schemas.
///
/// Every collection must be a list, every document an object with a non-empty
/// string `_id` or `id`, and the metadata's `total_documents` must match the
/// documents actually present.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralValidator;

#[async_trait]
impl ArtifactValidator for StructuralValidator {
    async fn validate(&self, artifact: &Value) -> ValidationReport {
        let mut report = ValidationReport::default();

        let Some(data) = artifact.get("data").and_then(Value::as_object) else {
            report.errors.push("Artifact has no data section".to_string());
            return report;
        };

        for (collection, documents) in data {
            let Some(documents) = documents.as_array() else {
                report.errors.push(format!("Collection '{}' is not a list", collection));
                continue;
            };

            for (index, document) in documents.iter().enumerate() {
                report.total_documents += 1;
                let has_id = document
                    .as_object()
                    .and_then(|fields| fields.get("_id").or_else(|| fields.get("id")))
                    .and_then(Value::as_str)
                    .is_some_and(|id| !id.is_empty());
                if has_id {
                    report.valid_documents += 1;
                } else {
                    report.invalid_documents += 1;
                    report
                        .errors
                        .push(format!("{}[{}]: document has no identifier", collection, index));
                }
            }
            report.collections_validated.push(collection.clone());
        }

        let declared = artifact
            .get("backup_metadata")
            .and_then(|metadata| metadata.get("total_documents"))
            .and_then(Value::as_u64);
        match declared {
            Some(declared) if declared != report.total_documents => report.errors.push(format!(
                "Metadata declares {} documents but artifact holds {}",
                declared, report.total_documents
            )),
            Some(_) => {}
            None => report.errors.push("Metadata has no total_documents".to_string()),
        }

        report.valid = report.errors.is_empty();
        report
    }
}

/// Parameters of [`BackupService::create_backup`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBackupRequest {
    pub include_replication: bool,
    pub backup_prefix: String,
    /// Only the replication leg is dry; the snapshot artifact is still written
    pub dry_run: bool,
}

impl Default for CreateBackupRequest {
    fn default() -> Self {
        Self {
            include_replication: false,
            backup_prefix: "backup".to_string(),
            dry_run: false,
        }
    }
}

impl CreateBackupRequest {
    pub fn with_replication(mut self, prefix: impl Into<String>) -> Self {
        self.include_replication = true;
        self.backup_prefix = prefix.into();
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateBackupResponse {
    /// `false` when the accompanying replication reported errors
    pub success: bool,
    pub backup_id: String,
    pub total_documents: u64,
    pub excluded_documents: u64,
    pub collections_backed_up: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_result: Option<ReplicationResult>,
}

/// Listing entry for [`BackupService::list_backups`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSummary {
    pub backup_id: String,
    pub filename: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub total_documents: u64,
    pub collections: Vec<String>,
}

/// Builder for [`BackupService`]
pub struct BackupServiceBuilder {
    config: BackupConfig,
    documents: Option<Arc<dyn DocumentStore>>,
    source: Option<(Arc<dyn ObjectStore>, String)>,
    destination: Option<Arc<dyn ObjectStore>>,
    catalog: CollectionCatalog,
    validator: Arc<dyn ArtifactValidator>,
    locations: Arc<dyn LocationSource>,
}

impl BackupServiceBuilder {
    pub fn documents(mut self, documents: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(documents);
        self
    }

    /// Object store and bucket holding the data tables to replicate
    pub fn source(mut self, store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        self.source = Some((store, bucket.into()));
        self
    }

    /// Destination store for the object-store replication leg
    pub fn destination(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.destination = Some(store);
        self
    }

    pub fn catalog(mut self, catalog: CollectionCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn validator(mut self, validator: Arc<dyn ArtifactValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn locations(mut self, locations: Arc<dyn LocationSource>) -> Self {
        self.locations = locations;
        self
    }

    pub fn build(self) -> Result<BackupService> {
        let documents = self
            .documents
            .ok_or(ConfigError::MissingComponent("document store"))?;
        let artifacts = ArtifactStore::new(self.config.artifact_root.clone());

        let replication = self.source.map(|(store, bucket)| {
            let manager = ReplicationStrategyManager::new(self.config.replication.clone(), store, bucket);
            match &self.destination {
                Some(destination) => manager.with_destination(destination.clone()),
                None => manager,
            }
        });

        let mut cleaner = RetentionCleaner::new(self.config.replication.clone());
        if let Some(destination) = &self.destination {
            cleaner = cleaner.with_destination(destination.clone());
        }

        Ok(BackupService {
            snapshots: SnapshotOrchestrator::new(documents.clone(), self.catalog.clone(), artifacts.clone()),
            restorer: RestoreOrchestrator::new(documents, self.catalog, artifacts.clone()),
            artifacts,
            replication,
            cleaner,
            validator: self.validator,
            locations: self.locations,
            config: self.config,
        })
    }
}

/// Administrative backup operations over one artifact root.
///
/// Mutating operations hold [`BackupLock`] on the artifact root for their
/// whole duration, so a cleanup never runs while a backup is being written.
pub struct BackupService {
    config: BackupConfig,
    artifacts: ArtifactStore,
    snapshots: SnapshotOrchestrator,
    restorer: RestoreOrchestrator,
    replication: Option<ReplicationStrategyManager>,
    cleaner: RetentionCleaner,
    validator: Arc<dyn ArtifactValidator>,
    locations: Arc<dyn LocationSource>,
}

impl BackupService {
    pub fn builder(config: BackupConfig) -> BackupServiceBuilder {
        BackupServiceBuilder {
            config,
            documents: None,
            source: None,
            destination: None,
            catalog: CollectionCatalog::default(),
            validator: Arc::new(StructuralValidator),
            locations: Arc::new(StaticLocations::default()),
        }
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    fn lock(&self, operation: &str) -> Result<BackupLock> {
        let stale_after = chrono::Duration::seconds(self.config.lock_stale_after_secs.min(u32::MAX as u64) as i64);
        BackupLock::acquire(&self.config.artifact_root, operation, stale_after)
    }

    /// Snapshot the document database and, when requested, replicate the
    /// data-table locations under the same generation timestamp.
    #[instrument(skip(self, request), fields(include_replication = request.include_replication, dry_run = request.dry_run))]
    pub async fn create_backup(&self, request: CreateBackupRequest, initiator: &str) -> Result<CreateBackupResponse> {
        let _lock = self.lock("create_backup")?;
        let manager = match (request.include_replication, self.replication.as_ref()) {
            (true, None) => return Err(ConfigError::MissingSource.into()),
            (true, Some(manager)) => Some(manager),
            (false, _) => None,
        };
        let at = self.free_generation(Utc::now()).await?;

        let mut artifact = self.snapshots.capture(initiator, at).await?;

        let replication_result = if let Some(manager) = manager {
            let locations = self
                .locations
                .locations()
                .await
                .map_err(|e| BackupError::Database(format!("listing data-table locations failed: {:#}", e)))?;
            let result = manager
                .replicate_at(&locations, &request.backup_prefix, request.dry_run, at)
                .await?;
            if !result.success() {
                warn!(backup_id = %artifact.backup_id(), errors = result.errors().len(), "Replication finished with errors");
            }
            artifact = artifact.with_replication(result.clone());
            Some(result)
        } else {
            None
        };

        let path = self.snapshots.persist(&artifact).await?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        info!(
            backup_id = %artifact.backup_id(),
            created_by = initiator,
            total_documents = artifact.metadata.total_documents,
            "Backup created"
        );

        Ok(CreateBackupResponse {
            success: replication_result.as_ref().map_or(true, ReplicationResult::success),
            backup_id: artifact.metadata.backup_id.clone(),
            total_documents: artifact.metadata.total_documents,
            excluded_documents: artifact.metadata.excluded_documents,
            collections_backed_up: artifact.metadata.collections.clone(),
            timestamp: artifact.metadata.timestamp,
            filename,
            replication_result,
        })
    }

    /// First whole second at or after `now` whose backup id is not taken.
    /// Called under the lock, so the id stays free until the artifact lands.
    async fn free_generation(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let mut at = now.trunc_subsecs(0);
        while self.artifacts.exists(&format_generation(at)).await? {
            debug!(backup_id = %format_generation(at), "Backup id taken, moving to the next second");
            at += chrono::Duration::seconds(1);
        }
        Ok(at)
    }

    /// Stored backups, newest first
    pub async fn list_backups(&self) -> Result<Vec<BackupSummary>> {
        let entries = self.artifacts.list().await?;
        Ok(entries
            .into_iter()
            .map(|entry| BackupSummary {
                backup_id: entry.metadata.backup_id,
                filename: entry.filename,
                size_bytes: entry.size_bytes,
                created_at: entry.metadata.timestamp,
                created_by: entry.metadata.created_by,
                total_documents: entry.metadata.total_documents,
                collections: entry.metadata.collections,
            })
            .collect())
    }

    pub async fn validate_backup(&self, backup_id: &str) -> Result<ValidationReport> {
        let raw = self.artifacts.load_raw(backup_id).await?;
        if raw.get("data").and_then(Value::as_object).is_none() {
            return Err(BackupError::InvalidArtifact(format!("{} has no data section", backup_id)));
        }
        let report = self.validator.validate(&raw).await;
        info!(
            backup_id,
            valid = report.valid,
            invalid_documents = report.invalid_documents,
            "Backup validated"
        );
        Ok(report)
    }

    /// Preview (`dry_run`) or apply a backup. Live restores hold the lock.
    pub async fn restore_backup(
        &self,
        backup_id: &str,
        dry_run: bool,
        collections: Option<Vec<String>>,
    ) -> Result<RestoreOutcome> {
        let _lock = if dry_run { None } else { Some(self.lock("restore_backup")?) };
        self.restorer
            .restore(backup_id, collections.as_deref(), dry_run)
            .await
    }

    pub async fn delete_backup(&self, backup_id: &str) -> Result<()> {
        let _lock = self.lock("delete_backup")?;
        self.artifacts.delete(backup_id).await?;
        info!(backup_id, "Backup deleted");
        Ok(())
    }

    /// Apply the configured retention to replicated generations and snapshot
    /// artifacts
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        self.cleanup_at(Utc::now()).await
    }

    /// [`cleanup`](Self::cleanup) against an explicit current time
    pub async fn cleanup_at(&self, now: DateTime<Utc>) -> Result<CleanupReport> {
        let _lock = self.lock("cleanup")?;
        let policy = RetentionPolicy::new(self.config.retention_days);
        let mut report = self.cleaner.cleanup_at(policy, now).await;

        match self.artifacts.list().await {
            Ok(entries) => {
                for entry in entries {
                    if !policy.is_expired(entry.metadata.timestamp, now) {
                        continue;
                    }
                    let backup_id = entry.metadata.backup_id;
                    match self.artifacts.delete(&backup_id).await {
                        Ok(()) => {
                            info!(backup_id = %backup_id, "Deleted expired snapshot artifact");
                            report.artifacts_deleted.push(backup_id);
                        }
                        Err(e) => {
                            error!(backup_id = %backup_id, error = %e, "Failed to delete expired snapshot artifact");
                            report.errors.push(format!("Failed to delete artifact {}: {}", backup_id, e));
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to list snapshot artifacts");
                report.errors.push(format!("Artifact cleanup failed: {}", e));
            }
        }

        Ok(report)
    }
}
