//! Object storage capability used for both the replication source and the
//! destination mirror.
//!
//! Transport details live in the implementations; the orchestration code only
//! relies on listing, get, put and bulk delete.

mod memory;
#[cfg(feature = "s3")]
mod s3;

pub use memory::MemoryObjectStore;
#[cfg(feature = "s3")]
pub use s3::S3ObjectStore;

use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use thiserror::Error;
use tokio::fs;

/// Largest number of keys a provider accepts in one bulk delete request
pub const MAX_DELETE_BATCH: usize = 1000;

/// Errors raised by object storage implementations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ObjectStoreError {
    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Bulk delete of {0} keys exceeds the provider limit of {MAX_DELETE_BATCH}")]
    BatchTooLarge(usize),

    #[error("Storage request failed: {0}")]
    Request(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// Result alias for object storage calls
pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

/// One entry of an object listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    /// Size as reported by the listing
    pub size: u64,
}

/// One page of an object listing
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub objects: Vec<ObjectSummary>,
    /// Token for the next page, `None` on the last page
    pub next_token: Option<String>,
}

/// S3-compatible object storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Buckets visible to the configured credentials, in provider order
    async fn list_buckets(&self) -> ObjectStoreResult<Vec<String>>;

    /// One page of objects whose key starts with `prefix`
    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> ObjectStoreResult<ObjectPage>;

    /// Common prefixes directly below `prefix` when listing with `delimiter`.
    /// Returned prefixes include the trailing delimiter.
    async fn list_common_prefixes(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
    ) -> ObjectStoreResult<Vec<String>>;

    async fn get_object(&self, bucket: &str, key: &str) -> ObjectStoreResult<Bytes>;

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> ObjectStoreResult<()>;

    /// Delete `keys` in a single provider call. Callers must batch to at most
    /// [`MAX_DELETE_BATCH`] keys.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> ObjectStoreResult<()>;

    /// Every object below `prefix`, following continuation tokens
    async fn list_objects(&self, bucket: &str, prefix: &str) -> ObjectStoreResult<Vec<ObjectSummary>> {
        let mut objects = Vec::new();
        let mut continuation = None;
        loop {
            let page = self.list_objects_page(bucket, prefix, continuation).await?;
            objects.extend(page.objects);
            match page.next_token {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }
        Ok(objects)
    }

    /// Download an object to `path`, creating parent directories
    async fn download_to_file(&self, bucket: &str, key: &str, path: &Path) -> ObjectStoreResult<u64> {
        let body = self.get_object(bucket, key).await?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ObjectStoreError::Io(format!("Failed to create {}: {}", parent.display(), e)))?;
        }
        fs::write(path, &body)
            .await
            .map_err(|e| ObjectStoreError::Io(format!("Failed to write {}: {}", path.display(), e)))?;
        Ok(body.len() as u64)
    }
}
