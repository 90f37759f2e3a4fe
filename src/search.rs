//! Text → vector → nearest posters.
//!
//! [`QueryService`] is shared by the `reel search` command and the HTTP UI.
//! It embeds the question on the text path of the multimodal model and asks
//! the store for the closest documents under the configured index. Results
//! come back in store order; nothing is re-ranked here.

use anyhow::Result;
use std::io::{BufRead, Write};
use std::sync::Arc;
use thiserror::Error;

use crate::config::Config;
use crate::embedding::{self, EmbedError, Embedder};
use crate::models::SearchHit;
use crate::store::sqlite::SqliteStore;
use crate::store::{DocumentStore, Keyspace};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("question must not be empty")]
    EmptyQuery,
    #[error("could not embed question: {0}")]
    Embedding(#[from] EmbedError),
    #[error("vector search failed: {0}")]
    Search(String),
}

pub struct QueryService {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn DocumentStore>,
    keyspace: Keyspace,
    index: String,
    field: String,
    limit: usize,
}

impl QueryService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn DocumentStore>,
        keyspace: Keyspace,
        index: &str,
        field: &str,
        limit: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            keyspace,
            index: index.to_string(),
            field: field.to_string(),
            limit: limit.max(1),
        }
    }

    /// Wire a service from configuration: keyspace, index and result limit.
    pub fn from_config(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self::new(
            embedder,
            store,
            config.keyspace.keyspace(),
            &config.index.name,
            &config.index.field,
            config.server.result_limit,
        )
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub async fn search(&self, question: &str) -> std::result::Result<Vec<SearchHit>, QueryError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        let vector = self.embedder.embed_text(question).await?;
        self.store
            .vector_search(&self.keyspace, &self.index, &self.field, &vector, self.limit)
            .await
            .map_err(|e| QueryError::Search(format!("{:#}", e)))
    }
}

/// `reel search`: one lookup against the configured database, printed to
/// stdout. Prompts on stdin when no question is given.
pub async fn run_search(config: &Config, question: Option<String>, limit: Option<usize>) -> Result<()> {
    let question = match question {
        Some(q) => q,
        None => prompt("Enter your question: ")?,
    };
    if question.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let embedder: Arc<dyn Embedder> = Arc::from(embedding::create_embedder(&config.embedding)?);
    let store = Arc::new(SqliteStore::connect(&config.db.path).await?);
    let mut service = QueryService::from_config(config, embedder, store.clone());
    if let Some(limit) = limit {
        service.limit = limit.max(1);
    }

    let hits = service.search(&question).await?;
    if hits.is_empty() {
        println!("No results.");
    }
    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.3}] {}", i + 1, hit.score, hit.title);
        if let Some(ref poster) = hit.poster_path {
            println!("    poster: {}", poster);
        }
        println!("    id: {}", hit.id);
    }

    store.close().await;
    Ok(())
}

fn prompt(message: &str) -> Result<String> {
    let mut out = std::io::stdout().lock();
    out.write_all(message.as_bytes())?;
    out.flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::ImageEmbeddings;
    use crate::models::EnrichedDocument;
    use crate::store::memory::InMemoryStore;
    use crate::store::VectorIndex;
    use async_trait::async_trait;

    struct Fixed(Vec<f32>);

    #[async_trait]
    impl Embedder for Fixed {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            self.0.len()
        }
        async fn embed_image(
            &self,
            _image: &[u8],
            _context: Option<&str>,
        ) -> std::result::Result<ImageEmbeddings, EmbedError> {
            Ok(ImageEmbeddings {
                image: self.0.clone(),
                text: None,
            })
        }
        async fn embed_text(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
            Ok(self.0.clone())
        }
    }

    async fn seeded() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        let ks = Keyspace::new("movies", "data", "data");
        store.ensure_keyspace(&ks).await.unwrap();
        for (id, title, v) in [("1", "Nova", vec![1.0, 0.0]), ("2", "Dusk", vec![0.0, 1.0])] {
            let doc = EnrichedDocument {
                id: id.into(),
                title: title.into(),
                release_date: None,
                popularity: None,
                imdb_id: None,
                overview: None,
                poster_path: Some(format!("http://x/{}.png", id)),
                backdrop_path: None,
                embedding_model: "fixed".into(),
                image_embedding: v,
                text_embedding: None,
            };
            store.upsert(&ks, &doc).await.unwrap();
        }
        let idx = VectorIndex::new("movie_vector", "image_embedding", 2).unwrap();
        store.create_vector_index(&ks, &idx).await.unwrap();
        store
    }

    fn service(store: Arc<InMemoryStore>, embedder: Arc<dyn Embedder>, limit: usize) -> QueryService {
        QueryService::new(
            embedder,
            store,
            Keyspace::new("movies", "data", "data"),
            "movie_vector",
            "image_embedding",
            limit,
        )
    }

    #[tokio::test]
    async fn nearest_title_comes_first() {
        let svc = service(seeded().await, Arc::new(Fixed(vec![0.9, 0.2])), 10);
        let hits = svc.search("a sci-fi adventure").await.unwrap();
        assert_eq!(hits[0].title, "Nova");
        assert_eq!(hits[0].poster_path.as_deref(), Some("http://x/1.png"));
    }

    #[tokio::test]
    async fn limit_is_respected() {
        let svc = service(seeded().await, Arc::new(Fixed(vec![0.9, 0.2])), 1);
        assert_eq!(svc.search("anything").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn errors_are_typed() {
        let svc = service(seeded().await, Arc::new(Fixed(vec![0.9, 0.2])), 10);
        assert!(matches!(svc.search("   ").await, Err(QueryError::EmptyQuery)));

        let svc = service(seeded().await, Arc::new(embedding::DisabledEmbedder), 10);
        assert!(matches!(
            svc.search("ship").await,
            Err(QueryError::Embedding(EmbedError::Disabled))
        ));

        // query dims do not match the index
        let svc = service(seeded().await, Arc::new(Fixed(vec![1.0, 0.0, 0.0])), 10);
        assert!(matches!(svc.search("ship").await, Err(QueryError::Search(_))));
    }
}
