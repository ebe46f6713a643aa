// S3 object store - works against AWS S3 and S3-compatible services
// (MinIO, LocalStack) through a custom endpoint URL

use super::{ObjectPage, ObjectStore, ObjectStoreError, ObjectStoreResult, ObjectSummary, MAX_DELETE_BATCH};
use crate::config::S3EndpointConfig;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use aws_types::region::Region;
use bytes::Bytes;
use tracing::debug;

/// Object store backed by `aws-sdk-s3`
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    config: S3EndpointConfig,
}

impl S3ObjectStore {
    /// Create a client for the given endpoint
    pub async fn new(config: S3EndpointConfig) -> Self {
        let mut aws_config_builder =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));

        // Support for LocalStack/MinIO with custom endpoint
        if let Some(ref endpoint) = config.endpoint_url {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);
        }

        if let (Some(access_key), Some(secret_key)) = (&config.access_key_id, &config.secret_access_key) {
            aws_config_builder = aws_config_builder.credentials_provider(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "hybrid-backup-static",
            ));
        }

        let aws_config = aws_config_builder.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        Self {
            client: Client::from_conf(s3_config_builder.build()),
            config,
        }
    }

    /// Bucket named in the endpoint configuration
    pub fn configured_bucket(&self) -> &str {
        &self.config.bucket_name
    }
}

fn request_error(action: &str, err: impl std::fmt::Display) -> ObjectStoreError {
    ObjectStoreError::Request(format!("{} failed: {}", action, err))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_buckets(&self) -> ObjectStoreResult<Vec<String>> {
        let response = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| request_error("ListBuckets", e.into_service_error()))?;

        Ok(response
            .buckets()
            .iter()
            .filter_map(|bucket| bucket.name().map(|name| name.to_string()))
            .collect())
    }

    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> ObjectStoreResult<ObjectPage> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_bucket() {
                    ObjectStoreError::BucketNotFound(bucket.to_string())
                } else {
                    request_error("ListObjectsV2", service_error)
                }
            })?;

        let objects = response
            .contents()
            .iter()
            .filter_map(|object| {
                object.key().map(|key| ObjectSummary {
                    key: key.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                })
            })
            .collect();

        let next_token = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(|token| token.to_string())
        } else {
            None
        };

        Ok(ObjectPage { objects, next_token })
    }

    async fn list_common_prefixes(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
    ) -> ObjectStoreResult<Vec<String>> {
        let mut prefixes = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .delimiter(delimiter)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| request_error("ListObjectsV2", e.into_service_error()))?;

            prefixes.extend(
                response
                    .common_prefixes()
                    .iter()
                    .filter_map(|common| common.prefix().map(|p| p.to_string())),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(prefixes)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> ObjectStoreResult<Bytes> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    ObjectStoreError::ObjectNotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    request_error("GetObject", service_error)
                }
            })?;

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| request_error("Reading object body", e))?;

        Ok(body.into_bytes())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> ObjectStoreResult<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| request_error("PutObject", e.into_service_error()))?;
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> ObjectStoreResult<()> {
        if keys.len() > MAX_DELETE_BATCH {
            return Err(ObjectStoreError::BatchTooLarge(keys.len()));
        }
        if keys.is_empty() {
            return Ok(());
        }

        let mut objects = Vec::with_capacity(keys.len());
        for key in keys {
            objects.push(
                ObjectIdentifier::builder()
                    .key(key)
                    .build()
                    .map_err(|e| request_error("Building object identifier", e))?,
            );
        }

        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| request_error("Building delete request", e))?;

        let response = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| request_error("DeleteObjects", e.into_service_error()))?;

        let failures = response.errors();
        if let Some(first) = failures.first() {
            return Err(ObjectStoreError::Request(format!(
                "DeleteObjects rejected {} keys, first: {} ({})",
                failures.len(),
                first.key().unwrap_or("?"),
                first.message().unwrap_or("no message"),
            )));
        }

        debug!(bucket, deleted = keys.len(), "Bulk delete completed");
        Ok(())
    }
}
