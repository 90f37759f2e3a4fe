//! Document store abstraction.
//!
//! The [`DocumentStore`] trait is everything the ingestion and query paths
//! need from persistence: keyspace provisioning, keyed upsert, vector index
//! definition and nearest-neighbour search. Two backends:
//! - [`SqliteStore`](sqlite::SqliteStore): durable, one SQLite file.
//! - [`InMemoryStore`](memory::InMemoryStore): `RwLock` maps, for tests.
//!
//! Implementations must be `Send + Sync`; workers upsert concurrently.

pub mod memory;
pub mod sqlite;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

use crate::embedding::cosine_similarity;
use crate::models::{EnrichedDocument, SearchHit};

/// Vector fields a document exposes to an index.
pub const VECTOR_FIELDS: [&str; 2] = ["image_embedding", "text_embedding"];

/// `bucket.scope.collection` triple naming where documents live.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Keyspace {
    pub bucket: String,
    pub scope: String,
    pub collection: String,
}

impl Keyspace {
    pub fn new(bucket: &str, scope: &str, collection: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            scope: scope.to_string(),
            collection: collection.to_string(),
        }
    }
}

impl fmt::Display for Keyspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.bucket, self.scope, self.collection)
    }
}

impl FromStr for Keyspace {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [b, s, c] if !b.is_empty() && !s.is_empty() && !c.is_empty() => {
                Ok(Keyspace::new(b, s, c))
            }
            _ => bail!("invalid keyspace '{}': expected bucket.scope.collection", s),
        }
    }
}

/// Definition of a vector index over one document field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorIndex {
    pub name: String,
    pub field: String,
    pub dims: usize,
}

impl VectorIndex {
    pub fn new(name: &str, field: &str, dims: usize) -> Result<Self> {
        if !VECTOR_FIELDS.contains(&field) {
            bail!(
                "cannot index field '{}': vector fields are {}",
                field,
                VECTOR_FIELDS.join(", ")
            );
        }
        if dims == 0 {
            bail!("vector index dimension must be > 0");
        }
        Ok(Self {
            name: name.to_string(),
            field: field.to_string(),
            dims,
        })
    }
}

/// What [`DocumentStore::create_vector_index`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Created,
    AlreadyExists,
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_keyspace`](DocumentStore::ensure_keyspace) | Provision a keyspace (idempotent) |
/// | [`upsert`](DocumentStore::upsert) | Insert or replace a document by id |
/// | [`get`](DocumentStore::get) | Fetch one document |
/// | [`count`](DocumentStore::count) | Documents in a keyspace |
/// | [`create_vector_index`](DocumentStore::create_vector_index) | Define an index (idempotent) |
/// | [`list_indexes`](DocumentStore::list_indexes) | Index definitions in a keyspace |
/// | [`vector_search`](DocumentStore::vector_search) | Cosine KNN over an indexed field |
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn ensure_keyspace(&self, keyspace: &Keyspace) -> Result<()>;

    /// Insert or replace `doc` under `doc.id`. The keyspace must exist.
    async fn upsert(&self, keyspace: &Keyspace, doc: &EnrichedDocument) -> Result<()>;

    async fn get(&self, keyspace: &Keyspace, id: &str) -> Result<Option<EnrichedDocument>>;

    async fn count(&self, keyspace: &Keyspace) -> Result<u64>;

    /// Create `index` unless an identical definition exists. A different
    /// definition under the same name is an error.
    async fn create_vector_index(
        &self,
        keyspace: &Keyspace,
        index: &VectorIndex,
    ) -> Result<IndexStatus>;

    async fn list_indexes(&self, keyspace: &Keyspace) -> Result<Vec<VectorIndex>>;

    /// Nearest documents to `query` by cosine similarity, best first.
    async fn vector_search(
        &self,
        keyspace: &Keyspace,
        index_name: &str,
        field: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>>;
}

/// Resolve an existing definition against a requested one.
pub(crate) fn reconcile_index(existing: &VectorIndex, requested: &VectorIndex) -> Result<IndexStatus> {
    if existing == requested {
        Ok(IndexStatus::AlreadyExists)
    } else {
        bail!(
            "vector index '{}' already exists with field '{}' and {} dimensions",
            existing.name,
            existing.field,
            existing.dims
        )
    }
}

/// Validate a search request against the index it names.
pub(crate) fn check_search(index: &VectorIndex, field: &str, query: &[f32]) -> Result<()> {
    if index.field != field {
        bail!(
            "vector index '{}' covers field '{}', not '{}'",
            index.name,
            index.field,
            field
        );
    }
    if query.len() != index.dims {
        bail!(
            "query vector has {} dimensions, index '{}' expects {}",
            query.len(),
            index.name,
            index.dims
        );
    }
    Ok(())
}

/// A stored vector plus the fields a hit needs.
pub(crate) struct Candidate {
    pub id: String,
    pub title: String,
    pub poster_path: Option<String>,
    pub vector: Vec<f32>,
}

/// Score candidates against `query`, best first, truncated to `limit`.
/// Vectors of the wrong dimension are not part of the index and are ignored.
pub(crate) fn rank(candidates: Vec<Candidate>, query: &[f32], limit: usize) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .filter(|c| c.vector.len() == query.len())
        .map(|c| SearchHit {
            score: cosine_similarity(query, &c.vector),
            id: c.id,
            title: c.title,
            poster_path: c.poster_path,
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(limit);
    hits
}
