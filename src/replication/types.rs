// Replication types - logical locations and per-run results

use crate::config::ReplicationStrategy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Path identifying a set of objects in the source store, e.g.
/// `project/123/table/456`. Leading and trailing slashes are stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogicalLocation(String);

impl LogicalLocation {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim_matches('/').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Listing prefix covering exactly the objects below this location
    pub fn listing_prefix(&self) -> String {
        format!("{}/", self.0)
    }
}

impl fmt::Display for LogicalLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LogicalLocation {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Outcome of one replication run.
///
/// Built once when the run finishes and never changed afterwards. Results of
/// the two legs of [`ReplicationStrategy::Both`] are combined with
/// [`ReplicationResult::merge`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationResult {
    strategy: ReplicationStrategy,
    backup_timestamp: String,
    locations_processed: u64,
    total_files: u64,
    total_bytes: u64,
    success: bool,
    errors: Vec<String>,
    backup_locations: BTreeMap<String, String>,
}

impl ReplicationResult {
    pub fn strategy(&self) -> ReplicationStrategy {
        self.strategy
    }

    pub fn backup_timestamp(&self) -> &str {
        &self.backup_timestamp
    }

    /// Locations that yielded at least one object and copied without error
    pub fn locations_processed(&self) -> u64 {
        self.locations_processed
    }

    pub fn total_files(&self) -> u64 {
        self.total_files
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Location to destination URI or local path
    pub fn backup_locations(&self) -> &BTreeMap<String, String> {
        &self.backup_locations
    }

    /// Combine the object-store and filesystem legs of a `Both` run.
    ///
    /// Counts and timestamp come from the object-store leg. Destinations are
    /// unioned with the object-store URI kept where both legs recorded the same
    /// location. Errors are concatenated, object-store leg first.
    pub fn merge(object_store: ReplicationResult, filesystem: ReplicationResult) -> ReplicationResult {
        let mut backup_locations = object_store.backup_locations;
        for (location, path) in filesystem.backup_locations {
            backup_locations.entry(location).or_insert(path);
        }

        let mut errors = object_store.errors;
        errors.extend(filesystem.errors);

        ReplicationResult {
            strategy: ReplicationStrategy::Both,
            backup_timestamp: object_store.backup_timestamp,
            locations_processed: object_store.locations_processed,
            total_files: object_store.total_files,
            total_bytes: object_store.total_bytes,
            success: object_store.success && filesystem.success,
            errors,
            backup_locations,
        }
    }
}

/// Per-location copy totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct LocationTotals {
    pub files: u64,
    pub bytes: u64,
}

/// Accumulates one leg of a run, consumed by [`LegRun::finish`]
#[derive(Debug)]
pub(crate) struct LegRun {
    strategy: ReplicationStrategy,
    backup_timestamp: String,
    locations_processed: u64,
    total_files: u64,
    total_bytes: u64,
    errors: Vec<String>,
    backup_locations: BTreeMap<String, String>,
}

impl LegRun {
    pub fn new(strategy: ReplicationStrategy, backup_timestamp: &str) -> Self {
        Self {
            strategy,
            backup_timestamp: backup_timestamp.to_string(),
            locations_processed: 0,
            total_files: 0,
            total_bytes: 0,
            errors: Vec::new(),
            backup_locations: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, location: &LogicalLocation, destination: String, totals: LocationTotals) {
        self.locations_processed += 1;
        self.total_files += totals.files;
        self.total_bytes += totals.bytes;
        self.backup_locations.insert(location.to_string(), destination);
    }

    pub fn fail(&mut self, message: String) {
        self.errors.push(message);
    }

    pub fn set_destination(&mut self, location: &str, destination: String) {
        self.backup_locations.insert(location.to_string(), destination);
    }

    pub fn destinations(&self) -> Vec<(String, String)> {
        self.backup_locations
            .iter()
            .map(|(location, destination)| (location.clone(), destination.clone()))
            .collect()
    }

    pub fn finish(self) -> ReplicationResult {
        ReplicationResult {
            strategy: self.strategy,
            backup_timestamp: self.backup_timestamp,
            locations_processed: self.locations_processed,
            total_files: self.total_files,
            total_bytes: self.total_bytes,
            success: self.errors.is_empty(),
            errors: self.errors,
            backup_locations: self.backup_locations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leg(strategy: ReplicationStrategy, locations: &[(&str, &str)], errors: &[&str], files: u64) -> ReplicationResult {
        let mut run = LegRun::new(strategy, "20240101_000000");
        for (location, destination) in locations {
            run.record(
                &LogicalLocation::new(location),
                destination.to_string(),
                LocationTotals { files, bytes: files * 10 },
            );
        }
        for error in errors {
            run.fail(error.to_string());
        }
        run.finish()
    }

    #[test]
    fn test_location_normalization() {
        let location = LogicalLocation::new("/proj/1/table/a/");
        assert_eq!(location.as_str(), "proj/1/table/a");
        assert_eq!(location.listing_prefix(), "proj/1/table/a/");
        assert!(LogicalLocation::new("///").is_empty());
    }

    #[test]
    fn test_finish_derives_success() {
        let ok = leg(ReplicationStrategy::MirrorToFilesystem, &[("a", "/x/a")], &[], 2);
        assert!(ok.success());
        assert_eq!(ok.locations_processed(), 1);
        assert_eq!(ok.total_bytes(), 20);

        let failed = leg(ReplicationStrategy::MirrorToFilesystem, &[], &["boom"], 0);
        assert!(!failed.success());
    }

    #[test]
    fn test_merge_prefers_object_store_leg() {
        let s3 = leg(
            ReplicationStrategy::MirrorToObjectStore,
            &[("a", "s3://bkt/p/t/a")],
            &[],
            3,
        );
        let fs = leg(
            ReplicationStrategy::MirrorToFilesystem,
            &[("a", "/local/p/t/a"), ("b", "/local/p/t/b")],
            &["b partially failed"],
            5,
        );

        let merged = ReplicationResult::merge(s3, fs);
        assert_eq!(merged.strategy(), ReplicationStrategy::Both);
        assert_eq!(merged.total_files(), 3);
        assert_eq!(merged.locations_processed(), 1);
        assert!(!merged.success());
        assert_eq!(merged.errors(), &["b partially failed".to_string()]);
        assert_eq!(merged.backup_locations().get("a").unwrap(), "s3://bkt/p/t/a");
        assert_eq!(merged.backup_locations().get("b").unwrap(), "/local/p/t/b");
    }
}
