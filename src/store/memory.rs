//! In-memory [`DocumentStore`] implementation for tests and dry runs.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. Vector search is brute-force
//! cosine similarity over every document in the keyspace.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::{EnrichedDocument, SearchHit};

use super::{
    check_search, rank, reconcile_index, Candidate, DocumentStore, IndexStatus, Keyspace,
    VectorIndex,
};

#[derive(Default)]
struct Collection {
    docs: HashMap<String, EnrichedDocument>,
    indexes: HashMap<String, VectorIndex>,
}

/// In-memory store.
pub struct InMemoryStore {
    keyspaces: RwLock<HashMap<Keyspace, Collection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            keyspaces: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

fn missing(keyspace: &Keyspace) -> anyhow::Error {
    anyhow!("keyspace not found: {}", keyspace)
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn ensure_keyspace(&self, keyspace: &Keyspace) -> Result<()> {
        let mut keyspaces = self.keyspaces.write().map_err(poisoned)?;
        keyspaces.entry(keyspace.clone()).or_default();
        Ok(())
    }

    async fn upsert(&self, keyspace: &Keyspace, doc: &EnrichedDocument) -> Result<()> {
        let mut keyspaces = self.keyspaces.write().map_err(poisoned)?;
        let collection = keyspaces.get_mut(keyspace).ok_or_else(|| missing(keyspace))?;
        collection.docs.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get(&self, keyspace: &Keyspace, id: &str) -> Result<Option<EnrichedDocument>> {
        let keyspaces = self.keyspaces.read().map_err(poisoned)?;
        let collection = keyspaces.get(keyspace).ok_or_else(|| missing(keyspace))?;
        Ok(collection.docs.get(id).cloned())
    }

    async fn count(&self, keyspace: &Keyspace) -> Result<u64> {
        let keyspaces = self.keyspaces.read().map_err(poisoned)?;
        let collection = keyspaces.get(keyspace).ok_or_else(|| missing(keyspace))?;
        Ok(collection.docs.len() as u64)
    }

    async fn create_vector_index(
        &self,
        keyspace: &Keyspace,
        index: &VectorIndex,
    ) -> Result<IndexStatus> {
        let mut keyspaces = self.keyspaces.write().map_err(poisoned)?;
        let collection = keyspaces.get_mut(keyspace).ok_or_else(|| missing(keyspace))?;
        if let Some(existing) = collection.indexes.get(&index.name) {
            return reconcile_index(existing, index);
        }
        collection.indexes.insert(index.name.clone(), index.clone());
        Ok(IndexStatus::Created)
    }

    async fn list_indexes(&self, keyspace: &Keyspace) -> Result<Vec<VectorIndex>> {
        let keyspaces = self.keyspaces.read().map_err(poisoned)?;
        let collection = keyspaces.get(keyspace).ok_or_else(|| missing(keyspace))?;
        let mut indexes: Vec<VectorIndex> = collection.indexes.values().cloned().collect();
        indexes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(indexes)
    }

    async fn vector_search(
        &self,
        keyspace: &Keyspace,
        index_name: &str,
        field: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let keyspaces = self.keyspaces.read().map_err(poisoned)?;
        let collection = keyspaces.get(keyspace).ok_or_else(|| missing(keyspace))?;
        let index = match collection.indexes.get(index_name) {
            Some(index) => index,
            None => bail!("vector index not found: {}", index_name),
        };
        check_search(index, field, query)?;

        let candidates = collection
            .docs
            .values()
            .filter_map(|doc| {
                doc.vector_field(field).map(|v| Candidate {
                    id: doc.id.clone(),
                    title: doc.title.clone(),
                    poster_path: doc.poster_path.clone(),
                    vector: v.to_vec(),
                })
            })
            .collect();

        Ok(rank(candidates, query, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, title: &str, image: Vec<f32>) -> EnrichedDocument {
        EnrichedDocument {
            id: id.to_string(),
            title: title.to_string(),
            release_date: None,
            popularity: None,
            imdb_id: None,
            overview: None,
            poster_path: Some(format!("http://x/{}.png", id)),
            backdrop_path: None,
            embedding_model: "test".to_string(),
            image_embedding: image,
            text_embedding: None,
        }
    }

    #[tokio::test]
    async fn upsert_requires_keyspace() {
        let store = InMemoryStore::new();
        let ks = Keyspace::new("movies", "data", "data");
        assert!(store.upsert(&ks, &doc("1", "Nova", vec![1.0])).await.is_err());
        store.ensure_keyspace(&ks).await.unwrap();
        store.upsert(&ks, &doc("1", "Nova", vec![1.0])).await.unwrap();
        assert_eq!(store.count(&ks).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = InMemoryStore::new();
        let ks = Keyspace::new("movies", "data", "data");
        store.ensure_keyspace(&ks).await.unwrap();
        store.upsert(&ks, &doc("1", "Nova", vec![1.0])).await.unwrap();
        store.upsert(&ks, &doc("1", "Nova II", vec![2.0])).await.unwrap();
        assert_eq!(store.count(&ks).await.unwrap(), 1);
        let stored = store.get(&ks, "1").await.unwrap().unwrap();
        assert_eq!(stored.title, "Nova II");
    }

    #[tokio::test]
    async fn index_creation_is_idempotent() {
        let store = InMemoryStore::new();
        let ks = Keyspace::new("movies", "data", "data");
        store.ensure_keyspace(&ks).await.unwrap();
        let idx = VectorIndex::new("movie_vector", "image_embedding", 2).unwrap();
        assert_eq!(store.create_vector_index(&ks, &idx).await.unwrap(), IndexStatus::Created);
        assert_eq!(
            store.create_vector_index(&ks, &idx).await.unwrap(),
            IndexStatus::AlreadyExists
        );
        assert_eq!(store.list_indexes(&ks).await.unwrap(), vec![idx]);
    }

    #[tokio::test]
    async fn search_ranks_nearest_first() {
        let store = InMemoryStore::new();
        let ks = Keyspace::new("movies", "data", "data");
        store.ensure_keyspace(&ks).await.unwrap();
        store.upsert(&ks, &doc("1", "Nova", vec![1.0, 0.0])).await.unwrap();
        store.upsert(&ks, &doc("2", "Dusk", vec![0.0, 1.0])).await.unwrap();
        let idx = VectorIndex::new("movie_vector", "image_embedding", 2).unwrap();
        store.create_vector_index(&ks, &idx).await.unwrap();

        let hits = store
            .vector_search(&ks, "movie_vector", "image_embedding", &[0.9, 0.1], 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Nova");

        assert!(store
            .vector_search(&ks, "missing", "image_embedding", &[0.9, 0.1], 10)
            .await
            .is_err());
    }
}
