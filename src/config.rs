//! Configuration for the backup components.
//!
//! Every component receives the part of [`BackupConfig`] it needs through its
//! constructor; nothing reads configuration from ambient state.

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Configuration errors. These are always fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Strategy name that does not map to a [`ReplicationStrategy`]
    #[error("Unknown replication strategy: {0}")]
    UnknownStrategy(String),

    /// Strategy requires a destination object store but none is configured
    #[error("Strategy {0} requires a destination object store, but none is configured")]
    MissingDestination(ReplicationStrategy),

    /// Replication requested without a source object store
    #[error("Replication requires a source object store, but none is configured")]
    MissingSource,

    /// A required collaborator was not supplied to a builder
    #[error("Missing required component: {0}")]
    MissingComponent(&'static str),

    /// Destination credentials cannot see any bucket
    #[error("No buckets visible to the destination credentials (configured bucket: {0})")]
    NoBucketAvailable(String),

    /// A value could not be parsed
    #[error("Invalid value for {key}: {value}")]
    InvalidValue {
        /// Setting name
        key: String,
        /// Offending value
        value: String,
    },
}

/// Where object-store data tables are mirrored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationStrategy {
    /// Copy every object into a second object store
    MirrorToObjectStore,
    /// Download every object below a local directory
    MirrorToFilesystem,
    /// Run both legs and merge their results
    Both,
}

impl ReplicationStrategy {
    /// Whether this strategy writes to a destination object store
    pub fn uses_object_store(&self) -> bool {
        matches!(self, Self::MirrorToObjectStore | Self::Both)
    }

    /// Whether this strategy writes to the local filesystem
    pub fn uses_filesystem(&self) -> bool {
        matches!(self, Self::MirrorToFilesystem | Self::Both)
    }

    /// Short name used in configuration and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MirrorToObjectStore => "s3_to_s3",
            Self::MirrorToFilesystem => "s3_to_filesystem",
            Self::Both => "both",
        }
    }
}

impl fmt::Display for ReplicationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplicationStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s3" | "s3_to_s3" | "object_store" | "mirror_to_object_store" => {
                Ok(Self::MirrorToObjectStore)
            }
            "filesystem" | "s3_to_filesystem" | "mirror_to_filesystem" => {
                Ok(Self::MirrorToFilesystem)
            }
            "both" => Ok(Self::Both),
            _ => Err(ConfigError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Connection settings for an S3-compatible endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3EndpointConfig {
    pub bucket_name: String,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl Default for S3EndpointConfig {
    fn default() -> Self {
        Self {
            bucket_name: "backups".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: None,
            force_path_style: false,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

/// Settings for the replication strategy manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    pub strategy: ReplicationStrategy,
    /// Destination endpoint for the object-store leg
    pub destination: Option<S3EndpointConfig>,
    /// Root directory for the filesystem leg
    pub local_root: PathBuf,
    /// Archive each mirrored location into a `.tar.gz`
    pub compression: bool,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            strategy: ReplicationStrategy::MirrorToFilesystem,
            destination: None,
            local_root: PathBuf::from("./backups/tables"),
            compression: false,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupConfig {
    pub replication: ReplicationConfig,
    /// Generations older than this many days are deleted
    pub retention_days: u32,
    /// Directory holding snapshot artifacts
    pub artifact_root: PathBuf,
    /// Age after which a leftover lock file is considered abandoned
    pub lock_stale_after_secs: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            replication: ReplicationConfig::default(),
            retention_days: 30,
            artifact_root: PathBuf::from("./backups/snapshots"),
            lock_stale_after_secs: 6 * 60 * 60,
        }
    }
}

impl BackupConfig {
    pub fn with_strategy(mut self, strategy: ReplicationStrategy) -> Self {
        self.replication.strategy = strategy;
        self
    }

    pub fn with_destination(mut self, destination: S3EndpointConfig) -> Self {
        self.replication.destination = Some(destination);
        self
    }

    pub fn with_local_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.replication.local_root = root.into();
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.replication.compression = enabled;
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn with_artifact_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.artifact_root = root.into();
        self
    }

    /// Build a configuration from `BACKUP_*` environment variables, falling
    /// back to defaults for anything unset.
    ///
    /// | Variable | Meaning |
    /// |---|---|
    /// | `BACKUP_STRATEGY` | `s3`, `filesystem` or `both` |
    /// | `BACKUP_LOCAL_ROOT` | filesystem mirror root |
    /// | `BACKUP_COMPRESSION` | `true`/`false` |
    /// | `BACKUP_RETENTION_DAYS` | integer |
    /// | `BACKUP_ARTIFACT_ROOT` | snapshot directory |
    /// | `BACKUP_S3_BUCKET` | destination bucket; enables the destination |
    /// | `BACKUP_S3_REGION`, `BACKUP_S3_ENDPOINT_URL`, `BACKUP_S3_FORCE_PATH_STYLE` | endpoint |
    /// | `BACKUP_S3_ACCESS_KEY_ID`, `BACKUP_S3_SECRET_ACCESS_KEY` | static credentials |
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(strategy) = env::var("BACKUP_STRATEGY") {
            config.replication.strategy = strategy.parse()?;
        }
        if let Ok(root) = env::var("BACKUP_LOCAL_ROOT") {
            config.replication.local_root = PathBuf::from(root);
        }
        if let Ok(value) = env::var("BACKUP_COMPRESSION") {
            config.replication.compression = parse_bool("BACKUP_COMPRESSION", &value)?;
        }
        if let Ok(value) = env::var("BACKUP_RETENTION_DAYS") {
            config.retention_days = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "BACKUP_RETENTION_DAYS".to_string(),
                value: value.clone(),
            })?;
        }
        if let Ok(root) = env::var("BACKUP_ARTIFACT_ROOT") {
            config.artifact_root = PathBuf::from(root);
        }

        if let Ok(bucket) = env::var("BACKUP_S3_BUCKET") {
            let mut destination = S3EndpointConfig {
                bucket_name: bucket,
                ..S3EndpointConfig::default()
            };
            if let Ok(region) = env::var("BACKUP_S3_REGION") {
                destination.region = region;
            }
            destination.endpoint_url = env::var("BACKUP_S3_ENDPOINT_URL").ok();
            if let Ok(value) = env::var("BACKUP_S3_FORCE_PATH_STYLE") {
                destination.force_path_style = parse_bool("BACKUP_S3_FORCE_PATH_STYLE", &value)?;
            }
            destination.access_key_id = env::var("BACKUP_S3_ACCESS_KEY_ID").ok();
            destination.secret_access_key = env::var("BACKUP_S3_SECRET_ACCESS_KEY").ok();
            config.replication.destination = Some(destination);
        }

        Ok(config)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("s3".parse(), Ok(ReplicationStrategy::MirrorToObjectStore));
        assert_eq!("S3_TO_FILESYSTEM".parse(), Ok(ReplicationStrategy::MirrorToFilesystem));
        assert_eq!(" both ".parse(), Ok(ReplicationStrategy::Both));
        assert_eq!(
            "tape".parse::<ReplicationStrategy>(),
            Err(ConfigError::UnknownStrategy("tape".to_string()))
        );
    }

    #[test]
    fn test_strategy_legs() {
        assert!(ReplicationStrategy::Both.uses_object_store());
        assert!(ReplicationStrategy::Both.uses_filesystem());
        assert!(!ReplicationStrategy::MirrorToFilesystem.uses_object_store());
        assert!(!ReplicationStrategy::MirrorToObjectStore.uses_filesystem());
    }

    #[test]
    fn test_builder_methods() {
        let config = BackupConfig::default()
            .with_strategy(ReplicationStrategy::Both)
            .with_compression(true)
            .with_retention_days(7)
            .with_local_root("/tmp/tables");

        assert_eq!(config.replication.strategy, ReplicationStrategy::Both);
        assert!(config.replication.compression);
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.replication.local_root, PathBuf::from("/tmp/tables"));
        assert!(config.replication.destination.is_none());
    }

    #[test]
    fn test_parse_bool_rejects_garbage() {
        assert!(parse_bool("X", "maybe").is_err());
        assert_eq!(parse_bool("X", "On"), Ok(true));
    }

    #[test]
    fn test_config_serde_roundtrip_uses_snake_case() {
        let config = BackupConfig::default().with_strategy(ReplicationStrategy::MirrorToObjectStore);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["replication"]["strategy"], "mirror_to_object_store");
    }
}
