//! Age-based cleanup of backup generations.
//!
//! A generation is one timestamped run: a `<prefix>/<YYYYMMDD_HHMMSS>/`
//! directory below the filesystem mirror root, or the same key prefix in the
//! destination bucket. Cleanup never fails its caller; problems are logged and
//! returned in the [`CleanupReport`].

use crate::config::{ReplicationConfig, S3EndpointConfig};
use crate::object_store::{ObjectStore, ObjectStoreError, MAX_DELETE_BATCH};
use crate::replication::resolve_bucket;
use crate::timestamp::parse_generation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, info, instrument};

/// How long generations are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub retention_days: u32,
}

impl RetentionPolicy {
    pub fn new(retention_days: u32) -> Self {
        Self { retention_days }
    }

    /// Whole days elapsed between `created` and `now`
    pub fn age_days(created: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
        (now - created).num_days()
    }

    /// A generation expires once its age in whole days is strictly greater
    /// than the retention period; one exactly `retention_days` old is kept.
    pub fn is_expired(&self, created: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        Self::age_days(created, now) > i64::from(self.retention_days)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(30)
    }
}

/// What a cleanup run removed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupReport {
    /// Deleted generation directories, relative to the mirror root
    pub filesystem_generations_deleted: Vec<String>,
    /// Deleted generation key prefixes in the destination bucket
    pub object_store_generations_deleted: Vec<String>,
    /// Snapshot artifact ids removed alongside the generations
    pub artifacts_deleted: Vec<String>,
    pub objects_deleted: u64,
    pub bulk_delete_calls: u64,
    pub errors: Vec<String>,
}

/// Deletes expired generations from the replication destinations
pub struct RetentionCleaner {
    config: ReplicationConfig,
    destination: Option<Arc<dyn ObjectStore>>,
}

impl RetentionCleaner {
    pub fn new(config: ReplicationConfig) -> Self {
        Self {
            config,
            destination: None,
        }
    }

    pub fn with_destination(mut self, destination: Arc<dyn ObjectStore>) -> Self {
        self.destination = Some(destination);
        self
    }

    /// Remove expired generations from every destination the configured
    /// strategy writes to
    pub async fn cleanup(&self, policy: RetentionPolicy) -> CleanupReport {
        self.cleanup_at(policy, Utc::now()).await
    }

    /// [`cleanup`](Self::cleanup) against an explicit current time
    #[instrument(skip(self), fields(strategy = %self.config.strategy))]
    pub async fn cleanup_at(&self, policy: RetentionPolicy, now: DateTime<Utc>) -> CleanupReport {
        let mut report = CleanupReport::default();
        info!(retention_days = policy.retention_days, "Starting retention cleanup");

        if self.config.strategy.uses_filesystem() {
            if let Err(e) = self.cleanup_filesystem(policy, now, &mut report).await {
                error!(error = %e, root = %self.config.local_root.display(), "Filesystem retention cleanup failed");
                report.errors.push(format!("Filesystem cleanup failed: {}", e));
            }
        }

        if self.config.strategy.uses_object_store() {
            if let Some(destination) = self.destination.as_deref() {
                if let Err(e) = self.cleanup_object_store(destination, policy, now, &mut report).await {
                    error!(error = %e, "Object-store retention cleanup failed");
                    report.errors.push(format!("Object-store cleanup failed: {}", e));
                }
            } else {
                debug!("No destination object store configured, skipping object-store cleanup");
            }
        }

        info!(
            filesystem_generations = report.filesystem_generations_deleted.len(),
            object_store_generations = report.object_store_generations_deleted.len(),
            objects_deleted = report.objects_deleted,
            errors = report.errors.len(),
            "Retention cleanup finished"
        );
        report
    }

    async fn cleanup_filesystem(
        &self,
        policy: RetentionPolicy,
        now: DateTime<Utc>,
        report: &mut CleanupReport,
    ) -> std::io::Result<()> {
        let root = &self.config.local_root;
        if !fs::try_exists(root).await? {
            debug!(root = %root.display(), "Mirror root does not exist, nothing to clean");
            return Ok(());
        }

        for group in sorted_subdirectories(root).await? {
            let group_path = root.join(&group);
            for generation in sorted_subdirectories(&group_path).await? {
                let Some(created) = parse_generation(&generation) else {
                    continue;
                };
                if !policy.is_expired(created, now) {
                    continue;
                }
                fs::remove_dir_all(group_path.join(&generation)).await?;
                let relative = format!("{}/{}", group, generation);
                info!(
                    generation = %relative,
                    age_days = RetentionPolicy::age_days(created, now),
                    "Deleted expired filesystem generation"
                );
                report.filesystem_generations_deleted.push(relative);
            }
        }
        Ok(())
    }

    async fn cleanup_object_store(
        &self,
        destination: &dyn ObjectStore,
        policy: RetentionPolicy,
        now: DateTime<Utc>,
        report: &mut CleanupReport,
    ) -> std::result::Result<(), String> {
        let configured = self
            .config
            .destination
            .as_ref()
            .map(|endpoint| endpoint.bucket_name.clone())
            .unwrap_or_else(|| S3EndpointConfig::default().bucket_name);
        let bucket = resolve_bucket(destination, &configured).await?.bucket;

        let groups = destination
            .list_common_prefixes(&bucket, "", "/")
            .await
            .map_err(|e| e.to_string())?;

        for group in groups {
            let generations = destination
                .list_common_prefixes(&bucket, &group, "/")
                .await
                .map_err(|e| e.to_string())?;

            for generation in generations {
                let name = generation
                    .trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .unwrap_or_default();
                let Some(created) = parse_generation(name) else {
                    continue;
                };
                if !policy.is_expired(created, now) {
                    continue;
                }

                let (deleted, calls) = delete_prefix(destination, &bucket, &generation)
                    .await
                    .map_err(|e| format!("deleting s3://{}/{} failed: {}", bucket, generation, e))?;
                info!(
                    bucket = %bucket,
                    generation = %generation,
                    objects = deleted,
                    batches = calls,
                    "Deleted expired object-store generation"
                );
                report.objects_deleted += deleted;
                report.bulk_delete_calls += calls;
                report.object_store_generations_deleted.push(generation);
            }
        }
        Ok(())
    }
}

/// Delete every object below `prefix`, in bulk requests of at most
/// [`MAX_DELETE_BATCH`] keys. Returns the number of objects and requests.
pub async fn delete_prefix(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
) -> std::result::Result<(u64, u64), ObjectStoreError> {
    let keys: Vec<String> = store
        .list_objects(bucket, prefix)
        .await?
        .into_iter()
        .map(|object| object.key)
        .collect();

    let mut calls = 0u64;
    for batch in keys.chunks(MAX_DELETE_BATCH) {
        store.delete_objects(bucket, batch).await?;
        calls += 1;
    }
    Ok((keys.len() as u64, calls))
}

async fn sorted_subdirectories(path: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_boundary_is_kept() {
        let now = Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap();
        let policy = RetentionPolicy::new(7);
        assert!(!policy.is_expired(now - Duration::days(7), now));
        assert!(!policy.is_expired(now - Duration::days(7) - Duration::hours(23), now));
        assert!(policy.is_expired(now - Duration::days(8), now));
    }

    #[test]
    fn test_zero_day_policy() {
        let now = Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap();
        let policy = RetentionPolicy::new(0);
        assert!(!policy.is_expired(now - Duration::hours(3), now));
        assert!(policy.is_expired(now - Duration::days(1), now));
    }

    #[test]
    fn test_future_generation_is_kept() {
        let now = Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap();
        assert!(!RetentionPolicy::new(0).is_expired(now + Duration::days(2), now));
    }
}
