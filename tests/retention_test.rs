// Integration tests for retention cleanup of backup generations

use chrono::{DateTime, Duration, TimeZone, Utc};
use hybrid_backup::config::{BackupConfig, ReplicationStrategy, S3EndpointConfig};
use hybrid_backup::object_store::MemoryObjectStore;
use hybrid_backup::retention::{CleanupReport, RetentionCleaner, RetentionPolicy};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;
use tempfile::TempDir;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn config(root: &TempDir, strategy: ReplicationStrategy) -> BackupConfig {
    BackupConfig::default()
        .with_strategy(strategy)
        .with_local_root(root.path())
        .with_destination(S3EndpointConfig {
            bucket_name: "archive".to_string(),
            ..S3EndpointConfig::default()
        })
}

fn destination_with_generations(expired_keys: usize) -> Arc<MemoryObjectStore> {
    let store = MemoryObjectStore::new();
    store.create_bucket("archive");
    for i in 0..expired_keys {
        store.insert(
            "archive",
            &format!("nightly/20240101_000000/proj/1/table/a/part/{:05}.parquet", i),
            vec![1u8; 8],
        );
    }
    for i in 0..5 {
        store.insert(
            "archive",
            &format!("nightly/20240530_000000/proj/1/table/a/part/{}.parquet", i),
            vec![1u8; 8],
        );
    }
    store.insert("archive", "nightly/latest-manifest/keep.json", vec![0u8; 2]);
    Arc::new(store)
}

proptest! {
    #[test]
    fn prop_generation_deleted_iff_older_than_retention(
        retention_days in 0u32..400,
        age_days in 0i64..500,
        extra_hours in 0i64..24,
    ) {
        let created = now() - Duration::days(age_days) - Duration::hours(extra_hours);
        let policy = RetentionPolicy::new(retention_days);
        prop_assert_eq!(policy.is_expired(created, now()), age_days > i64::from(retention_days));
    }
}

#[tokio::test]
async fn test_filesystem_cleanup_deletes_only_expired_generations() {
    let root = TempDir::new().unwrap();
    for dir in [
        "nightly/20240101_000000/proj/1/table/a",
        "nightly/20240520_000000/proj/1/table/a",
        "nightly/2024-01-01",
        "nightly/notes",
        "weekly/20231231_235959",
    ] {
        std::fs::create_dir_all(root.path().join(dir)).unwrap();
    }
    std::fs::write(root.path().join("nightly/20240101_000000/proj/1/table/a/part.parquet"), b"x").unwrap();

    let config = config(&root, ReplicationStrategy::MirrorToFilesystem);
    let report = RetentionCleaner::new(config.replication.clone())
        .cleanup_at(RetentionPolicy::new(30), now())
        .await;

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(
        report.filesystem_generations_deleted,
        vec!["nightly/20240101_000000".to_string(), "weekly/20231231_235959".to_string()]
    );
    assert!(!root.path().join("nightly/20240101_000000").exists());
    assert!(root.path().join("nightly/20240520_000000").exists());
    assert!(root.path().join("nightly/2024-01-01").exists());
    assert!(root.path().join("nightly/notes").exists());
}

#[tokio::test]
async fn test_generation_exactly_at_retention_is_kept() {
    let root = TempDir::new().unwrap();
    // 2024-05-02 12:00:00 is exactly 30 days before now()
    std::fs::create_dir_all(root.path().join("nightly/20240502_120000")).unwrap();
    std::fs::create_dir_all(root.path().join("nightly/20240501_115959")).unwrap();

    let config = config(&root, ReplicationStrategy::MirrorToFilesystem);
    let report = RetentionCleaner::new(config.replication.clone())
        .cleanup_at(RetentionPolicy::new(30), now())
        .await;

    assert_eq!(report.filesystem_generations_deleted, vec!["nightly/20240501_115959".to_string()]);
    assert!(root.path().join("nightly/20240502_120000").exists());
}

#[tokio::test]
async fn test_object_store_cleanup_batches_deletes() {
    let root = TempDir::new().unwrap();
    let destination = destination_with_generations(2500);
    let config = config(&root, ReplicationStrategy::MirrorToObjectStore);

    let report = RetentionCleaner::new(config.replication.clone())
        .with_destination(destination.clone())
        .cleanup_at(RetentionPolicy::new(30), now())
        .await;

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(destination.delete_calls(), 3);
    assert_eq!(report.bulk_delete_calls, 3);
    assert_eq!(report.objects_deleted, 2500);
    assert_eq!(
        report.object_store_generations_deleted,
        vec!["nightly/20240101_000000/".to_string()]
    );

    let remaining = destination.keys("archive");
    assert_eq!(remaining.len(), 6);
    assert!(remaining.iter().all(|key| !key.starts_with("nightly/20240101_000000/")));
    assert!(report.filesystem_generations_deleted.is_empty());
}

#[tokio::test]
async fn test_object_store_failure_is_reported_not_raised() {
    let root = TempDir::new().unwrap();
    std::fs::create_dir_all(root.path().join("nightly/20240101_000000")).unwrap();
    let destination = destination_with_generations(10);
    destination.fail_prefix("nightly/20240101_000000/");
    let config = config(&root, ReplicationStrategy::Both);

    let report = RetentionCleaner::new(config.replication.clone())
        .with_destination(destination.clone())
        .cleanup_at(RetentionPolicy::new(30), now())
        .await;

    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("nightly/20240101_000000"));
    assert_eq!(destination.keys("archive").len(), 16);
    assert_eq!(report.filesystem_generations_deleted, vec!["nightly/20240101_000000".to_string()]);
}

#[tokio::test]
async fn test_object_store_cleanup_skipped_without_destination() {
    let root = TempDir::new().unwrap();
    let config = config(&root, ReplicationStrategy::MirrorToObjectStore);

    let report = RetentionCleaner::new(config.replication.clone())
        .cleanup_at(RetentionPolicy::new(1), now())
        .await;

    assert_eq!(report, CleanupReport::default());
}
