// Collection catalog - which collections are backed up and what each excludes

use crate::document::{Filter, ObjectId};
use serde::{Deserialize, Serialize};

/// Records left out of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExclusionRule {
    /// Everything is included
    None,
    /// Skip transient (temporary) accounts; applies to the user collection
    TransientAccounts,
    /// Skip records whose owners are all transient accounts. The owner field
    /// holds one reference or a list of them; an empty or missing list keeps
    /// the record.
    OwnedByTransientAccount { owner_field: String },
}

/// One backed-up collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    pub exclusion: ExclusionRule,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>, exclusion: ExclusionRule) -> Self {
        Self {
            name: name.into(),
            exclusion,
        }
    }
}

/// Fixed, ordered set of collections included in snapshots and accepted on
/// restore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionCatalog {
    collections: Vec<CollectionSpec>,
    user_collection: String,
    transient_flag: String,
}

impl Default for CollectionCatalog {
    fn default() -> Self {
        let owner = || ExclusionRule::OwnedByTransientAccount {
            owner_field: "owner".to_string(),
        };
        Self {
            collections: vec![
                CollectionSpec::new("user", ExclusionRule::TransientAccounts),
                CollectionSpec::new("project", ExclusionRule::None),
                CollectionSpec::new("table", ExclusionRule::None),
                CollectionSpec::new("dashboard", owner()),
                CollectionSpec::new("report", ExclusionRule::None),
            ],
            user_collection: "user".to_string(),
            transient_flag: "is_temporary".to_string(),
        }
    }
}

impl CollectionCatalog {
    /// Catalog over `collections`; transient accounts live in `user_collection`
    /// and carry `transient_flag: true`
    pub fn new(
        collections: Vec<CollectionSpec>,
        user_collection: impl Into<String>,
        transient_flag: impl Into<String>,
    ) -> Self {
        Self {
            collections,
            user_collection: user_collection.into(),
            transient_flag: transient_flag.into(),
        }
    }

    pub fn collections(&self) -> &[CollectionSpec] {
        &self.collections
    }

    pub fn names(&self) -> Vec<String> {
        self.collections.iter().map(|spec| spec.name.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.collections.iter().any(|spec| spec.name == name)
    }

    pub fn user_collection(&self) -> &str {
        &self.user_collection
    }

    /// Filter selecting transient accounts in the user collection
    pub fn transient_accounts(&self) -> Filter {
        Filter::eq(self.transient_flag.clone(), true)
    }

    /// Filter selecting the documents of `spec` that go into the snapshot
    pub fn inclusion_filter(&self, spec: &CollectionSpec, transient_ids: &[ObjectId]) -> Filter {
        match &spec.exclusion {
            ExclusionRule::None => Filter::All,
            ExclusionRule::TransientAccounts => Filter::ne(self.transient_flag.clone(), true),
            ExclusionRule::OwnedByTransientAccount { .. } if transient_ids.is_empty() => Filter::All,
            ExclusionRule::OwnedByTransientAccount { owner_field } => {
                Filter::OnlyIn(owner_field.clone(), transient_ids.to_vec()).negate()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_order() {
        let catalog = CollectionCatalog::default();
        assert_eq!(catalog.names(), vec!["user", "project", "table", "dashboard", "report"]);
        assert!(catalog.contains("dashboard"));
        assert!(!catalog.contains("session"));
    }

    #[test]
    fn test_inclusion_filters() {
        let catalog = CollectionCatalog::default();
        let specs = catalog.collections();
        let id = ObjectId::new();

        assert_eq!(catalog.inclusion_filter(&specs[1], &[id]), Filter::All);
        assert_eq!(
            catalog.inclusion_filter(&specs[0], &[id]),
            Filter::ne("is_temporary", true)
        );
        assert_eq!(
            catalog.inclusion_filter(&specs[3], &[id]),
            Filter::Not(Box::new(Filter::OnlyIn("owner".to_string(), vec![id])))
        );
        assert_eq!(catalog.inclusion_filter(&specs[3], &[]), Filter::All);
    }
}
