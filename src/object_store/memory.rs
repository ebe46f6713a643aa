use super::{ObjectPage, ObjectStore, ObjectStoreError, ObjectStoreResult, ObjectSummary, MAX_DELETE_BATCH};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashSet;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Buckets = BTreeMap<String, BTreeMap<String, Bytes>>;

/// In-memory object store.
///
/// Behaves like an S3 endpoint for listing order, pagination and the bulk
/// delete limit, and counts mutating calls so callers can assert on them.
#[derive(Clone)]
pub struct MemoryObjectStore {
    buckets: Arc<RwLock<Buckets>>,
    page_size: usize,
    failing_prefixes: Arc<DashSet<String>>,
    put_calls: Arc<AtomicUsize>,
    delete_calls: Arc<AtomicUsize>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            buckets: Arc::new(RwLock::new(BTreeMap::new())),
            page_size: 1000,
            failing_prefixes: Arc::new(DashSet::new()),
            put_calls: Arc::new(AtomicUsize::new(0)),
            delete_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of keys returned per listing page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn create_bucket(&self, bucket: &str) {
        self.buckets.write().entry(bucket.to_string()).or_default();
    }

    /// Store an object without counting it as a put call
    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Bytes>) {
        self.buckets
            .write()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), body.into());
    }

    /// Make every listing and read touching `prefix` fail with access denied
    pub fn fail_prefix(&self, prefix: &str) {
        self.failing_prefixes.insert(prefix.to_string());
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .read()
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.buckets.read().get(bucket).and_then(|objects| objects.get(key).cloned())
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    fn check_access(&self, key_or_prefix: &str) -> ObjectStoreResult<()> {
        let denied = self
            .failing_prefixes
            .iter()
            .any(|failing| key_or_prefix.starts_with(failing.as_str()));
        if denied {
            return Err(ObjectStoreError::AccessDenied(key_or_prefix.to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list_buckets(&self) -> ObjectStoreResult<Vec<String>> {
        Ok(self.buckets.read().keys().cloned().collect())
    }

    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> ObjectStoreResult<ObjectPage> {
        self.check_access(prefix)?;
        let buckets = self.buckets.read();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| ObjectStoreError::BucketNotFound(bucket.to_string()))?;

        let lower = match continuation {
            Some(ref token) => Bound::Excluded(token.clone()),
            None => Bound::Included(prefix.to_string()),
        };

        let mut page: Vec<ObjectSummary> = objects
            .range((lower, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(self.page_size + 1)
            .map(|(key, body)| ObjectSummary {
                key: key.clone(),
                size: body.len() as u64,
            })
            .collect();

        let next_token = if page.len() > self.page_size {
            page.truncate(self.page_size);
            page.last().map(|object| object.key.clone())
        } else {
            None
        };

        Ok(ObjectPage {
            objects: page,
            next_token,
        })
    }

    async fn list_common_prefixes(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
    ) -> ObjectStoreResult<Vec<String>> {
        self.check_access(prefix)?;
        let buckets = self.buckets.read();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| ObjectStoreError::BucketNotFound(bucket.to_string()))?;

        let prefixes: BTreeSet<String> = objects
            .keys()
            .filter_map(|key| {
                let rest = key.strip_prefix(prefix)?;
                let end = rest.find(delimiter)?;
                Some(format!("{}{}", prefix, &rest[..end + delimiter.len()]))
            })
            .collect();

        Ok(prefixes.into_iter().collect())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> ObjectStoreResult<Bytes> {
        self.check_access(key)?;
        let buckets = self.buckets.read();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| ObjectStoreError::BucketNotFound(bucket.to_string()))?;
        objects.get(key).cloned().ok_or_else(|| ObjectStoreError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> ObjectStoreResult<()> {
        self.check_access(key)?;
        let mut buckets = self.buckets.write();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| ObjectStoreError::BucketNotFound(bucket.to_string()))?;
        objects.insert(key.to_string(), body);
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> ObjectStoreResult<()> {
        if keys.len() > MAX_DELETE_BATCH {
            return Err(ObjectStoreError::BatchTooLarge(keys.len()));
        }
        let mut buckets = self.buckets.write();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| ObjectStoreError::BucketNotFound(bucket.to_string()))?;
        for key in keys {
            objects.remove(key);
        }
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
