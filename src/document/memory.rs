use super::{Document, DocumentStore, Filter};
use anyhow::{bail, Result};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;

/// In-memory document database
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    collections: Arc<DashMap<String, Vec<Document>>>,
    failing_reads: Arc<DashSet<String>>,
    failing_writes: Arc<DashSet<String>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a collection's contents directly
    pub fn seed(&self, collection: &str, documents: Vec<Document>) {
        self.collections.insert(collection.to_string(), documents);
    }

    /// Current contents of a collection
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .get(collection)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Make reads of `collection` fail
    pub fn fail_reads(&self, collection: &str) {
        self.failing_reads.insert(collection.to_string());
    }

    /// Make deletes and inserts on `collection` fail
    pub fn fail_writes(&self, collection: &str) {
        self.failing_writes.insert(collection.to_string());
    }

    fn check_read(&self, collection: &str) -> Result<()> {
        if self.failing_reads.contains(collection) {
            bail!("read from collection '{}' refused", collection);
        }
        Ok(())
    }

    fn check_write(&self, collection: &str) -> Result<()> {
        if self.failing_writes.contains(collection) {
            bail!("write to collection '{}' refused", collection);
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        self.check_read(collection)?;
        Ok(self
            .collections
            .get(collection)
            .map(|entry| entry.value().iter().filter(|doc| filter.matches(doc)).cloned().collect())
            .unwrap_or_default())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        self.check_read(collection)?;
        Ok(self
            .collections
            .get(collection)
            .map(|entry| entry.value().iter().filter(|doc| filter.matches(doc)).count() as u64)
            .unwrap_or(0))
    }

    async fn delete_all(&self, collection: &str) -> Result<u64> {
        self.check_write(collection)?;
        Ok(self
            .collections
            .remove(collection)
            .map(|(_, docs)| docs.len() as u64)
            .unwrap_or(0))
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> Result<usize> {
        self.check_write(collection)?;
        let inserted = documents.len();
        self.collections
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocValue;

    #[tokio::test]
    async fn test_find_count_delete_insert() {
        let store = MemoryDocumentStore::new();
        let docs: Vec<Document> = (0..4)
            .map(|i| Document::from([("n".to_string(), DocValue::Int(i))]))
            .collect();
        store.seed("items", docs.clone());

        assert_eq!(store.count("items", &Filter::All).await.unwrap(), 4);
        assert_eq!(store.find("items", &Filter::eq("n", 2i64)).await.unwrap().len(), 1);
        assert_eq!(store.delete_all("items").await.unwrap(), 4);
        assert!(store.find("items", &Filter::All).await.unwrap().is_empty());
        assert_eq!(store.insert_many("items", docs).await.unwrap(), 4);
        assert_eq!(store.documents("items").len(), 4);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryDocumentStore::new();
        store.fail_reads("a");
        store.fail_writes("b");
        assert!(store.find("a", &Filter::All).await.is_err());
        assert!(store.count("b", &Filter::All).await.is_ok());
        assert!(store.delete_all("b").await.is_err());
    }
}
