//! Document model and the database capability used by snapshot and restore.
//!
//! The database driver itself is an external collaborator; implement
//! [`DocumentStore`] over it. [`MemoryDocumentStore`] is provided for tests and
//! dry environments.

mod memory;
pub mod normalize;

pub use memory::MemoryDocumentStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A stored document
pub type Document = BTreeMap<String, DocValue>;

/// Native 12-byte document identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

/// Error parsing an [`ObjectId`] from text
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid object id: {0}")]
pub struct InvalidObjectId(String);

impl ObjectId {
    /// Generate a random identifier
    pub fn new() -> Self {
        let random = uuid::Uuid::new_v4();
        let mut bytes = [0u8; 12];
        bytes.copy_from_slice(&random.as_bytes()[..12]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Lowercase 24-character hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = InvalidObjectId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 24 {
            return Err(InvalidObjectId(s.to_string()));
        }
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| InvalidObjectId(s.to_string()))?;
        Ok(Self(bytes))
    }
}

/// A value inside a document
#[derive(Debug, Clone, PartialEq)]
pub enum DocValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    ObjectId(ObjectId),
    /// Link to a document in another collection
    Reference { collection: String, id: ObjectId },
    DateTime(DateTime<Utc>),
    Array(Vec<DocValue>),
    Document(Document),
}

impl DocValue {
    /// The identifier this value points at, if it is an id, a reference or an
    /// id in string form
    pub fn referenced_id(&self) -> Option<ObjectId> {
        match self {
            DocValue::ObjectId(id) => Some(*id),
            DocValue::Reference { id, .. } => Some(*id),
            DocValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Identifiers referenced by this value. An array yields one entry per
    /// element, `None` where the element is not a reference.
    pub fn referenced_ids(&self) -> Vec<Option<ObjectId>> {
        match self {
            DocValue::Array(items) => items.iter().map(DocValue::referenced_id).collect(),
            other => vec![other.referenced_id()],
        }
    }
}

impl From<&str> for DocValue {
    fn from(value: &str) -> Self {
        DocValue::String(value.to_string())
    }
}

impl From<String> for DocValue {
    fn from(value: String) -> Self {
        DocValue::String(value)
    }
}

impl From<bool> for DocValue {
    fn from(value: bool) -> Self {
        DocValue::Bool(value)
    }
}

impl From<i64> for DocValue {
    fn from(value: i64) -> Self {
        DocValue::Int(value)
    }
}

impl From<f64> for DocValue {
    fn from(value: f64) -> Self {
        DocValue::Float(value)
    }
}

impl From<ObjectId> for DocValue {
    fn from(value: ObjectId) -> Self {
        DocValue::ObjectId(value)
    }
}

/// Query predicate over documents.
///
/// Field names may use dots to reach into embedded documents.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document
    All,
    /// Field equals the value
    Eq(String, DocValue),
    /// Field is missing or differs from the value
    Ne(String, DocValue),
    /// Field references one of the identifiers
    In(String, Vec<ObjectId>),
    /// Field is missing or references none of the identifiers
    NotIn(String, Vec<ObjectId>),
    /// Field references at least one identifier and every reference is in
    /// the set. An empty array never matches.
    OnlyIn(String, Vec<ObjectId>),
    And(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<DocValue>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<DocValue>) -> Self {
        Filter::Ne(field.into(), value.into())
    }

    /// Complement of this filter
    pub fn negate(self) -> Self {
        match self {
            Filter::Not(inner) => *inner,
            other => Filter::Not(Box::new(other)),
        }
    }

    /// Conjunction that drops `All` terms
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut left), Filter::And(right)) => {
                left.extend(right);
                Filter::And(left)
            }
            (Filter::And(mut left), f) => {
                left.push(f);
                Filter::And(left)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    /// Evaluate against a document
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, value) => lookup(document, field) == Some(value),
            Filter::Ne(field, value) => lookup(document, field) != Some(value),
            Filter::In(field, ids) => lookup(document, field)
                .map(|value| value.referenced_ids().into_iter().flatten().any(|id| ids.contains(&id)))
                .unwrap_or(false),
            Filter::NotIn(field, ids) => !Filter::In(field.clone(), ids.clone()).matches(document),
            Filter::OnlyIn(field, ids) => lookup(document, field)
                .map(|value| {
                    let referenced = value.referenced_ids();
                    !referenced.is_empty() && referenced.iter().all(|id| id.is_some_and(|id| ids.contains(&id)))
                })
                .unwrap_or(false),
            Filter::And(filters) => filters.iter().all(|f| f.matches(document)),
            Filter::Not(inner) => !inner.matches(document),
        }
    }
}

/// Resolve a dotted field path
pub fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a DocValue> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        match current {
            DocValue::Document(inner) => current = inner.get(part)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Document database capability
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Documents matching `filter`, in storage order
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>>;

    /// Number of documents matching `filter`
    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64>;

    /// Remove every document, returning how many were removed
    async fn delete_all(&self, collection: &str) -> Result<u64>;

    /// Insert documents in order, returning how many were inserted
    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> Result<usize>;
}
