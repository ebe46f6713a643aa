// Snapshot artifact storage - one JSON file per backup in the artifact root

use super::types::{ArtifactEntry, SnapshotArtifact};
use crate::timestamp::parse_generation;
use crate::{BackupError, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

/// Artifact file name for a backup id
pub fn artifact_filename(backup_id: &str) -> String {
    format!("backup_{}.json", backup_id)
}

fn already_exists(backup_id: &str) -> BackupError {
    BackupError::Io(format!("Backup {} already exists", backup_id))
}

/// File-based storage for snapshot artifacts
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn ensure_directory_exists(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| BackupError::Io(format!("Failed to create backup directory: {}", e)))
    }

    /// Path of the artifact for `backup_id`. Ids that are not generation
    /// timestamps never name a file.
    fn artifact_path(&self, backup_id: &str) -> Result<PathBuf> {
        if parse_generation(backup_id).is_none() {
            return Err(BackupError::NotFound(backup_id.to_string()));
        }
        Ok(self.root.join(artifact_filename(backup_id)))
    }

    /// Whether an artifact named `backup_id` is already stored
    pub async fn exists(&self, backup_id: &str) -> Result<bool> {
        let path = self.artifact_path(backup_id)?;
        fs::try_exists(&path)
            .await
            .map_err(|e| BackupError::Io(format!("Failed to inspect {}: {}", path.display(), e)))
    }

    /// Write the artifact. The full document is serialized in memory, written
    /// to a temporary file in the same directory and hard-linked into place,
    /// so a partially written artifact is never visible under its final name
    /// and an existing artifact is never replaced.
    pub async fn persist(&self, artifact: &SnapshotArtifact) -> Result<PathBuf> {
        self.ensure_directory_exists().await?;
        if self.exists(artifact.backup_id()).await? {
            return Err(already_exists(artifact.backup_id()));
        }
        let path = self.artifact_path(artifact.backup_id())?;

        let serialized = serde_json::to_vec_pretty(artifact)?;
        let temp_path = self
            .root
            .join(format!(".{}.{}.tmp", artifact_filename(artifact.backup_id()), Uuid::new_v4()));

        let write_result = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&serialized).await?;
            file.sync_all().await?;
            fs::hard_link(&temp_path, &path).await
        }
        .await;
        let _ = fs::remove_file(&temp_path).await;

        match write_result {
            Ok(()) => Ok(path),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(already_exists(artifact.backup_id())),
            Err(e) => Err(BackupError::Io(format!("Failed to write backup artifact: {}", e))),
        }
    }

    /// Raw JSON of an artifact
    pub async fn load_raw(&self, backup_id: &str) -> Result<Value> {
        let path = self.artifact_path(backup_id)?;
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackupError::NotFound(backup_id.to_string()));
            }
            Err(e) => return Err(BackupError::Io(format!("Failed to read backup artifact: {}", e))),
        };
        serde_json::from_slice(&data)
            .map_err(|e| BackupError::InvalidArtifact(format!("{} is not valid JSON: {}", backup_id, e)))
    }

    /// Typed artifact
    pub async fn load(&self, backup_id: &str) -> Result<SnapshotArtifact> {
        let raw = self.load_raw(backup_id).await?;
        serde_json::from_value(raw).map_err(|e| BackupError::InvalidArtifact(format!("{}: {}", backup_id, e)))
    }

    /// Every readable artifact, newest first. Files that cannot be parsed are
    /// skipped with a warning.
    pub async fn list(&self) -> Result<Vec<ArtifactEntry>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BackupError::Io(format!("Failed to read backup directory: {}", e))),
        };

        let mut listed = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BackupError::Io(format!("Failed to read directory entry: {}", e)))?
        {
            let filename = entry.file_name().to_string_lossy().into_owned();
            let Some(backup_id) = filename
                .strip_prefix("backup_")
                .and_then(|rest| rest.strip_suffix(".json"))
            else {
                continue;
            };
            if parse_generation(backup_id).is_none() {
                continue;
            }

            let size_bytes = match entry.metadata().await {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    warn!(file = %filename, error = %e, "Skipping unreadable backup artifact");
                    continue;
                }
            };

            match self.load(backup_id).await {
                Ok(artifact) => listed.push(ArtifactEntry {
                    filename,
                    size_bytes,
                    metadata: artifact.metadata,
                }),
                Err(e) => warn!(file = %filename, error = %e, "Skipping unreadable backup artifact"),
            }
        }

        // Sort by creation time (newest first)
        listed.sort_by(|a, b| b.metadata.timestamp.cmp(&a.metadata.timestamp));
        Ok(listed)
    }

    pub async fn delete(&self, backup_id: &str) -> Result<()> {
        let path = self.artifact_path(backup_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BackupError::NotFound(backup_id.to_string())),
            Err(e) => Err(BackupError::Io(format!("Failed to delete backup artifact: {}", e))),
        }
    }
}
