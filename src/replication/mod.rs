//! Replication strategy manager.
//!
//! Mirrors object-store locations into a destination object store, the local
//! filesystem, or both. Locations are processed one at a time; a failing
//! location is reported in the result and the run moves on.

mod archive;
mod types;

pub use archive::{archive_path, compress_directory};
pub use types::{LogicalLocation, ReplicationResult};

use crate::config::{ConfigError, ReplicationConfig, ReplicationStrategy, S3EndpointConfig};
use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::timestamp::format_generation;
use crate::Result;
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use types::{LegRun, LocationTotals};

/// Bucket actually used by the object-store leg
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketResolution {
    pub bucket: String,
    /// `true` when the configured bucket was not visible and the first
    /// visible bucket was used instead
    pub fell_back: bool,
}

/// Pick the destination bucket.
///
/// The configured bucket is used when the destination credentials can see it.
/// Otherwise the first visible bucket is selected and a warning is logged.
/// The bucket actually used is always reported back.
pub async fn resolve_bucket(
    store: &dyn ObjectStore,
    configured: &str,
) -> std::result::Result<BucketResolution, String> {
    let visible = store
        .list_buckets()
        .await
        .map_err(|e| format!("Failed to list destination buckets: {}", e))?;

    if visible.iter().any(|bucket| bucket == configured) {
        return Ok(BucketResolution {
            bucket: configured.to_string(),
            fell_back: false,
        });
    }

    match visible.into_iter().next() {
        Some(first) => {
            warn!(
                configured_bucket = configured,
                selected_bucket = %first,
                "Configured destination bucket not visible, falling back to first available bucket"
            );
            Ok(BucketResolution {
                bucket: first,
                fell_back: true,
            })
        }
        None => Err(ConfigError::NoBucketAvailable(configured.to_string()).to_string()),
    }
}

/// Executes the configured replication strategy over logical locations
pub struct ReplicationStrategyManager {
    config: ReplicationConfig,
    source: Arc<dyn ObjectStore>,
    source_bucket: String,
    destination: Option<Arc<dyn ObjectStore>>,
}

impl ReplicationStrategyManager {
    pub fn new(config: ReplicationConfig, source: Arc<dyn ObjectStore>, source_bucket: impl Into<String>) -> Self {
        Self {
            config,
            source,
            source_bucket: source_bucket.into(),
            destination: None,
        }
    }

    /// Destination client for the object-store leg
    pub fn with_destination(mut self, destination: Arc<dyn ObjectStore>) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn strategy(&self) -> ReplicationStrategy {
        self.config.strategy
    }

    /// Mirror `locations` under `backup_prefix/<timestamp>/`.
    ///
    /// Fails only when the strategy needs a destination object store that was
    /// not configured. Every other problem is reported in the result.
    pub async fn replicate(
        &self,
        locations: &[String],
        backup_prefix: &str,
        dry_run: bool,
    ) -> Result<ReplicationResult> {
        self.replicate_at(locations, backup_prefix, dry_run, Utc::now()).await
    }

    /// [`replicate`](Self::replicate) with an explicit generation timestamp
    #[instrument(skip(self, locations), fields(strategy = %self.config.strategy, locations = locations.len()))]
    pub async fn replicate_at(
        &self,
        locations: &[String],
        backup_prefix: &str,
        dry_run: bool,
        at: DateTime<Utc>,
    ) -> Result<ReplicationResult> {
        let strategy = self.config.strategy;
        if strategy.uses_object_store() && self.destination.is_none() {
            return Err(ConfigError::MissingDestination(strategy).into());
        }

        let timestamp = format_generation(at);
        let prefix = backup_prefix.trim_matches('/');
        let locations: Vec<LogicalLocation> = locations.iter().map(|raw| LogicalLocation::new(raw)).collect();

        info!(backup_timestamp = %timestamp, backup_prefix = prefix, dry_run, "Starting replication");

        let result = match strategy {
            ReplicationStrategy::MirrorToObjectStore => {
                self.mirror_to_object_store(&locations, prefix, &timestamp, dry_run).await
            }
            ReplicationStrategy::MirrorToFilesystem => {
                self.mirror_to_filesystem(&locations, prefix, &timestamp, dry_run).await
            }
            ReplicationStrategy::Both => {
                let object_store = self.mirror_to_object_store(&locations, prefix, &timestamp, dry_run).await;
                let filesystem = self.mirror_to_filesystem(&locations, prefix, &timestamp, dry_run).await;
                ReplicationResult::merge(object_store, filesystem)
            }
        };

        info!(
            backup_timestamp = %timestamp,
            locations_processed = result.locations_processed(),
            total_files = result.total_files(),
            total_bytes = result.total_bytes(),
            errors = result.errors().len(),
            success = result.success(),
            "Replication finished"
        );

        Ok(result)
    }

    async fn mirror_to_object_store(
        &self,
        locations: &[LogicalLocation],
        prefix: &str,
        timestamp: &str,
        dry_run: bool,
    ) -> ReplicationResult {
        let mut run = LegRun::new(ReplicationStrategy::MirrorToObjectStore, timestamp);

        let Some(destination) = self.destination.as_deref() else {
            run.fail(ConfigError::MissingDestination(ReplicationStrategy::MirrorToObjectStore).to_string());
            return run.finish();
        };

        let configured = self
            .config
            .destination
            .as_ref()
            .map(|endpoint| endpoint.bucket_name.clone())
            .unwrap_or_else(|| S3EndpointConfig::default().bucket_name);

        let bucket = match resolve_bucket(destination, &configured).await {
            Ok(resolution) => resolution.bucket,
            Err(message) => {
                warn!(error = %message, "Object-store replication leg cannot start");
                run.fail(message);
                return run.finish();
            }
        };

        for location in locations {
            let destination_prefix = destination_prefix(prefix, timestamp, location);
            match self
                .copy_location_to_store(destination, &bucket, location, &destination_prefix, dry_run)
                .await
            {
                Ok(None) => debug!(location = %location, "No objects under location, skipping"),
                Ok(Some(totals)) => {
                    let uri = format!("s3://{}/{}", bucket, destination_prefix);
                    run.record(location, uri, totals);
                }
                Err(message) => {
                    warn!(location = %location, error = %message, "Object-store replication of location failed");
                    run.fail(format!("Failed to replicate {} to s3://{}: {}", location, bucket, message));
                }
            }
        }

        run.finish()
    }

    async fn copy_location_to_store(
        &self,
        destination: &dyn ObjectStore,
        bucket: &str,
        location: &LogicalLocation,
        destination_prefix: &str,
        dry_run: bool,
    ) -> std::result::Result<Option<LocationTotals>, String> {
        let objects = self.list_location(location).await?;
        if objects.is_empty() {
            return Ok(None);
        }

        let listing_prefix = location.listing_prefix();
        let mut totals = LocationTotals::default();
        for object in objects {
            let relative = object.key.strip_prefix(&listing_prefix).unwrap_or(&object.key);
            let destination_key = format!("{}/{}", destination_prefix, relative);

            if !dry_run {
                let body = self
                    .source
                    .get_object(&self.source_bucket, &object.key)
                    .await
                    .map_err(|e| format!("download of {} failed: {}", object.key, e))?;
                destination
                    .put_object(bucket, &destination_key, body)
                    .await
                    .map_err(|e| format!("upload of {} failed: {}", destination_key, e))?;
            }
            debug!(source_key = %object.key, destination_key = %destination_key, size = object.size, dry_run, "Copied object");

            totals.files += 1;
            totals.bytes += object.size;
        }

        Ok(Some(totals))
    }

    async fn mirror_to_filesystem(
        &self,
        locations: &[LogicalLocation],
        prefix: &str,
        timestamp: &str,
        dry_run: bool,
    ) -> ReplicationResult {
        let mut run = LegRun::new(ReplicationStrategy::MirrorToFilesystem, timestamp);

        for location in locations {
            let directory = self
                .config
                .local_root
                .join(destination_prefix(prefix, timestamp, location));
            match self.download_location(location, &directory, dry_run).await {
                Ok(None) => debug!(location = %location, "No objects under location, skipping"),
                Ok(Some(totals)) => run.record(location, directory.display().to_string(), totals),
                Err(message) => {
                    warn!(location = %location, error = %message, "Filesystem replication of location failed");
                    run.fail(format!(
                        "Failed to replicate {} to {}: {}",
                        location,
                        self.config.local_root.display(),
                        message
                    ));
                }
            }
        }

        if self.config.compression && !dry_run {
            for (location, directory) in run.destinations() {
                let directory = PathBuf::from(directory);
                match tokio::task::spawn_blocking(move || compress_directory(&directory)).await {
                    Ok(Ok(archive)) => {
                        debug!(location = %location, archive = %archive.display(), "Compressed location");
                        run.set_destination(&location, archive.display().to_string());
                    }
                    Ok(Err(message)) => {
                        warn!(location = %location, error = %message, "Compression failed, keeping uncompressed copy");
                    }
                    Err(join_error) => {
                        warn!(location = %location, error = %join_error, "Compression task failed, keeping uncompressed copy");
                    }
                }
            }
        }

        run.finish()
    }

    async fn download_location(
        &self,
        location: &LogicalLocation,
        directory: &Path,
        dry_run: bool,
    ) -> std::result::Result<Option<LocationTotals>, String> {
        let objects = self.list_location(location).await?;
        if objects.is_empty() {
            return Ok(None);
        }

        let listing_prefix = location.listing_prefix();
        let mut totals = LocationTotals::default();
        for object in objects {
            let relative = object.key.strip_prefix(&listing_prefix).unwrap_or(&object.key);
            let path = directory.join(safe_relative_path(relative)?);

            if !dry_run {
                self.source
                    .download_to_file(&self.source_bucket, &object.key, &path)
                    .await
                    .map_err(|e| format!("download of {} failed: {}", object.key, e))?;
            }
            debug!(source_key = %object.key, path = %path.display(), size = object.size, dry_run, "Downloaded object");

            totals.files += 1;
            totals.bytes += object.size;
        }

        Ok(Some(totals))
    }

    async fn list_location(
        &self,
        location: &LogicalLocation,
    ) -> std::result::Result<Vec<crate::object_store::ObjectSummary>, String> {
        if location.is_empty() {
            return Err("empty location".to_string());
        }
        self.source
            .list_objects(&self.source_bucket, &location.listing_prefix())
            .await
            .map_err(|e: ObjectStoreError| format!("listing failed: {}", e))
    }
}

/// `backup_prefix/timestamp/location`, skipping an empty prefix
fn destination_prefix(prefix: &str, timestamp: &str, location: &LogicalLocation) -> String {
    if prefix.is_empty() {
        format!("{}/{}", timestamp, location)
    } else {
        format!("{}/{}/{}", prefix, timestamp, location)
    }
}

/// Relative path for an object key, refusing keys that would escape the
/// mirror directory
fn safe_relative_path(relative: &str) -> std::result::Result<PathBuf, String> {
    let path = Path::new(relative);
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return Err(format!("object key {} escapes the mirror directory", relative)),
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(format!("object key {} has no file name", relative));
    }
    Ok(clean)
}
