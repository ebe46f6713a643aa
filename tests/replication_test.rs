// Integration tests for the replication strategy manager
// Runs against the in-memory object store and a scratch filesystem root

use chrono::{TimeZone, Utc};
use hybrid_backup::config::{BackupConfig, ConfigError, ReplicationStrategy, S3EndpointConfig};
use hybrid_backup::object_store::{MemoryObjectStore, ObjectStore};
use hybrid_backup::replication::ReplicationStrategyManager;
use hybrid_backup::BackupError;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;

const SOURCE_BUCKET: &str = "tables";

fn at() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 17, 3, 0, 0).unwrap()
}

/// Source with 3 objects (4096 bytes) under table/a and nothing under table/b
fn seeded_source() -> Arc<MemoryObjectStore> {
    let source = MemoryObjectStore::new();
    source.create_bucket(SOURCE_BUCKET);
    source.insert(SOURCE_BUCKET, "proj/1/table/a/_meta.json", vec![b'm'; 1024]);
    source.insert(SOURCE_BUCKET, "proj/1/table/a/part/0.parquet", vec![b'p'; 1024]);
    source.insert(SOURCE_BUCKET, "proj/1/table/a/part/1.parquet", vec![b'q'; 2048]);
    source.insert(SOURCE_BUCKET, "proj/1/table/c/part/0.parquet", vec![b'c'; 10]);
    Arc::new(source)
}

fn locations(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn destination_with(buckets: &[&str]) -> Arc<MemoryObjectStore> {
    let destination = MemoryObjectStore::new();
    for bucket in buckets {
        destination.create_bucket(bucket);
    }
    Arc::new(destination)
}

fn config(root: &TempDir, strategy: ReplicationStrategy) -> BackupConfig {
    BackupConfig::default()
        .with_strategy(strategy)
        .with_local_root(root.path().join("tables"))
        .with_destination(S3EndpointConfig {
            bucket_name: "archive".to_string(),
            ..S3EndpointConfig::default()
        })
}

#[tokio::test]
async fn test_filesystem_mirror_skips_empty_locations() {
    let root = TempDir::new().unwrap();
    let config = config(&root, ReplicationStrategy::MirrorToFilesystem);
    let manager = ReplicationStrategyManager::new(config.replication.clone(), seeded_source(), SOURCE_BUCKET);

    let result = manager
        .replicate_at(&locations(&["proj/1/table/a", "proj/1/table/b"]), "nightly", false, at())
        .await
        .expect("replication should not fail");

    assert!(result.success());
    assert_eq!(result.backup_timestamp(), "20240517_030000");
    assert_eq!(result.locations_processed(), 1);
    assert_eq!(result.total_files(), 3);
    assert_eq!(result.total_bytes(), 4096);
    assert_eq!(
        result.backup_locations().keys().cloned().collect::<Vec<_>>(),
        vec!["proj/1/table/a".to_string()]
    );

    let mirrored = root.path().join("tables/nightly/20240517_030000/proj/1/table/a");
    assert_eq!(std::fs::read(mirrored.join("part/1.parquet")).unwrap().len(), 2048);
    assert!(mirrored.join("_meta.json").exists());
    assert!(!root.path().join("tables/nightly/20240517_030000/proj/1/table/b").exists());
}

#[tokio::test]
async fn test_bucket_fallback_uses_first_visible_bucket() {
    let root = TempDir::new().unwrap();
    let config = config(&root, ReplicationStrategy::MirrorToObjectStore);
    let destination = destination_with(&["backup-eu", "backup-us"]);
    let manager = ReplicationStrategyManager::new(config.replication.clone(), seeded_source(), SOURCE_BUCKET)
        .with_destination(destination.clone());

    let result = manager
        .replicate_at(&locations(&["proj/1/table/a", "proj/1/table/c"]), "nightly", false, at())
        .await
        .unwrap();

    assert!(result.success());
    assert_eq!(result.locations_processed(), 2);
    for uri in result.backup_locations().values() {
        assert!(uri.starts_with("s3://backup-eu/nightly/20240517_030000/"), "{}", uri);
    }
    assert_eq!(
        destination.keys("backup-eu"),
        vec![
            "nightly/20240517_030000/proj/1/table/a/_meta.json".to_string(),
            "nightly/20240517_030000/proj/1/table/a/part/0.parquet".to_string(),
            "nightly/20240517_030000/proj/1/table/a/part/1.parquet".to_string(),
            "nightly/20240517_030000/proj/1/table/c/part/0.parquet".to_string(),
        ]
    );
    assert!(destination.keys("backup-us").is_empty());
}

#[tokio::test]
async fn test_dry_run_counts_match_live_run_without_writes() {
    let root = TempDir::new().unwrap();
    let config = config(&root, ReplicationStrategy::Both);
    let source = seeded_source();
    let targets = locations(&["proj/1/table/a", "proj/1/table/b", "proj/1/table/c"]);

    let dry_destination = destination_with(&["archive"]);
    let dry = ReplicationStrategyManager::new(config.replication.clone(), source.clone(), SOURCE_BUCKET)
        .with_destination(dry_destination.clone())
        .replicate_at(&targets, "nightly", true, at())
        .await
        .unwrap();

    assert_eq!(dry_destination.put_calls(), 0);
    assert!(dry_destination.keys("archive").is_empty());
    assert!(!root.path().join("tables").join("nightly").exists());

    let live_destination = destination_with(&["archive"]);
    let live = ReplicationStrategyManager::new(config.replication.clone(), source, SOURCE_BUCKET)
        .with_destination(live_destination.clone())
        .replicate_at(&targets, "nightly", false, at())
        .await
        .unwrap();

    assert_eq!(dry.total_files(), live.total_files());
    assert_eq!(dry.total_bytes(), live.total_bytes());
    assert_eq!(dry.locations_processed(), live.locations_processed());
    assert_eq!(live_destination.put_calls(), 4);
}

#[tokio::test]
async fn test_one_failing_location_is_reported_and_skipped() {
    let root = TempDir::new().unwrap();
    let config = config(&root, ReplicationStrategy::MirrorToFilesystem);
    let source = seeded_source();
    source.insert(SOURCE_BUCKET, "proj/2/table/x/part/0.parquet", vec![0u8; 64]);
    source.fail_prefix("proj/2/table/x");

    let manager = ReplicationStrategyManager::new(config.replication.clone(), source, SOURCE_BUCKET);
    let result = manager
        .replicate_at(
            &locations(&["proj/1/table/a", "proj/2/table/x", "proj/1/table/c"]),
            "nightly",
            false,
            at(),
        )
        .await
        .unwrap();

    assert!(!result.success());
    assert_eq!(result.locations_processed(), 2);
    assert_eq!(result.errors().len(), 1);
    assert!(result.errors()[0].contains("proj/2/table/x"));
    assert_eq!(result.total_files(), 4);
    assert!(!result.backup_locations().contains_key("proj/2/table/x"));
}

#[tokio::test]
async fn test_missing_destination_is_fatal() {
    let root = TempDir::new().unwrap();
    let config = config(&root, ReplicationStrategy::Both);
    let manager = ReplicationStrategyManager::new(config.replication.clone(), seeded_source(), SOURCE_BUCKET);

    let err = manager
        .replicate_at(&locations(&["proj/1/table/a"]), "nightly", false, at())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BackupError::Config(ConfigError::MissingDestination(ReplicationStrategy::Both))
    ));
    assert!(!root.path().join("tables").exists());
}

#[tokio::test]
async fn test_compression_replaces_directory_with_archive() {
    let root = TempDir::new().unwrap();
    let config = config(&root, ReplicationStrategy::MirrorToFilesystem).with_compression(true);
    let manager = ReplicationStrategyManager::new(config.replication.clone(), seeded_source(), SOURCE_BUCKET);

    let result = manager
        .replicate_at(&locations(&["proj/1/table/a"]), "nightly", false, at())
        .await
        .unwrap();

    let generation = root.path().join("tables/nightly/20240517_030000/proj/1/table");
    let archive = generation.join("a.tar.gz");
    assert!(archive.is_file());
    assert!(!generation.join("a").exists());
    assert_eq!(
        result.backup_locations()["proj/1/table/a"],
        archive.display().to_string()
    );
    assert_eq!(result.total_bytes(), 4096);
}

#[tokio::test]
async fn test_both_strategy_merges_legs() {
    let root = TempDir::new().unwrap();
    let config = config(&root, ReplicationStrategy::Both);
    let destination = destination_with(&["archive"]);
    let manager = ReplicationStrategyManager::new(config.replication.clone(), seeded_source(), SOURCE_BUCKET)
        .with_destination(destination.clone());

    let result = manager
        .replicate_at(&locations(&["proj/1/table/a"]), "nightly", false, at())
        .await
        .unwrap();

    assert_eq!(result.strategy(), ReplicationStrategy::Both);
    assert!(result.success());
    assert_eq!(result.locations_processed(), 1);
    assert_eq!(result.total_files(), 3);
    assert_eq!(
        result.backup_locations()["proj/1/table/a"],
        "s3://archive/nightly/20240517_030000/proj/1/table/a"
    );
    assert_eq!(destination.keys("archive").len(), 3);
    assert!(root
        .path()
        .join("tables/nightly/20240517_030000/proj/1/table/a/part/0.parquet")
        .exists());
}

#[tokio::test]
async fn test_no_visible_bucket_fails_only_the_object_store_leg() {
    let root = TempDir::new().unwrap();
    let config = config(&root, ReplicationStrategy::Both);
    let destination = destination_with(&[]);
    let manager = ReplicationStrategyManager::new(config.replication.clone(), seeded_source(), SOURCE_BUCKET)
        .with_destination(destination.clone());

    let result = manager
        .replicate_at(&locations(&["proj/1/table/a"]), "nightly", false, at())
        .await
        .unwrap();

    assert!(!result.success());
    assert_eq!(result.errors().len(), 1);
    assert!(result.errors()[0].contains("archive"));
    assert!(destination.list_buckets().await.unwrap().is_empty());
    assert!(root
        .path()
        .join("tables/nightly/20240517_030000/proj/1/table/a/_meta.json")
        .exists());
}
