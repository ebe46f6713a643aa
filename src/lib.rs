//! # Hybrid Backup
//!
//! Backup, replication and restore for a storage system made of a document
//! database (entity records) and an S3-compatible object store (the large
//! columnar tables those records point at).
//!
//! ## Overview
//!
//! The two backends are backed up independently:
//!
//! - Object-store data is mirrored per logical location to a secondary object
//!   store, a local directory, or both ([`replication`]).
//! - Document collections are captured into a single JSON snapshot artifact
//!   ([`snapshot`]) and can be previewed or re-applied later ([`restore`]).
//! - Old generations in every destination are pruned by age ([`retention`]).
//!
//! [`service::BackupService`] exposes the operator-facing operations on top of
//! these components.
//!
//! ## Quick Start
//!
//! ```rust
//! use hybrid_backup::config::BackupConfig;
//! use hybrid_backup::document::MemoryDocumentStore;
//! use hybrid_backup::object_store::MemoryObjectStore;
//! use hybrid_backup::service::{BackupService, CreateBackupRequest};
//! use std::sync::Arc;
//!
//! # async fn example() -> hybrid_backup::Result<()> {
//! let config = BackupConfig::default()
//!     .with_artifact_root("/var/lib/backups/snapshots")
//!     .with_local_root("/var/lib/backups/tables");
//!
//! let service = BackupService::builder(config)
//!     .documents(Arc::new(MemoryDocumentStore::new()))
//!     .source(Arc::new(MemoryObjectStore::new()), "tables")
//!     .build()?;
//!
//! let response = service
//!     .create_backup(CreateBackupRequest::default(), "admin@example.com")
//!     .await?;
//! println!("created {}", response.backup_id);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Explicit configuration passed to every component
//! - [`object_store`]: Object storage capability plus memory and S3 backends
//! - [`document`]: Document model, filters and the database capability
//! - [`replication`]: Strategy manager mirroring object-store locations
//! - [`retention`]: Age-based cleanup of backup generations
//! - [`snapshot`]: Document snapshot creation and artifact storage
//! - [`restore`]: Snapshot preview and destructive restore
//! - [`service`]: Administrative operations

#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for backup operations
pub type Result<T> = std::result::Result<T, BackupError>;

/// Main error type for backup operations.
///
/// Only fatal conditions travel through this type. Per-location and
/// per-collection failures are collected into the result of the operation
/// instead.
#[derive(Error, Debug)]
pub enum BackupError {
    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Object storage failure outside of per-item processing
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::ObjectStoreError),

    /// Document database read or write failure
    #[error("Database error: {0}")]
    Database(String),

    /// Requested snapshot artifact does not exist
    #[error("Backup not found: {0}")]
    NotFound(String),

    /// Snapshot artifact exists but is missing required sections
    #[error("Invalid backup artifact: {0}")]
    InvalidArtifact(String),

    /// Another operation holds the backup root
    #[error("Backup root is locked by {0}")]
    Locked(String),

    /// Filesystem failure
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration types
pub mod config;

/// Tracing subscriber setup
pub mod logging;

/// Backup generation timestamps
pub mod timestamp;

/// Advisory lock on a backup root
pub mod lock;

/// Object storage capability
pub mod object_store;

/// Document model and database capability
pub mod document;

/// Object-store replication
pub mod replication;

/// Retention cleanup
pub mod retention;

/// Document snapshots
pub mod snapshot;

/// Snapshot restore
pub mod restore;

/// Administrative operations
pub mod service;

pub use config::{BackupConfig, ReplicationStrategy};
pub use replication::{ReplicationResult, ReplicationStrategyManager};
pub use restore::{RestoreOrchestrator, RestoreOutcome};
pub use retention::{RetentionCleaner, RetentionPolicy};
pub use service::BackupService;
pub use snapshot::{SnapshotArtifact, SnapshotOrchestrator};
