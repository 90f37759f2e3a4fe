//! Per-record transform: filter → fetch → validate → embed → shape → upsert.
//!
//! Every stage short-circuits. The result is an [`Outcome`]; item-level
//! errors never escape as `Err` or panics, so one bad record cannot take the
//! pool down with it.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::embedding::{EmbedError, Embedder};
use crate::fetch::ImageFetcher;
use crate::filter::{RecordFilter, SkipReason};
use crate::image_check::{self, ImageFormat};
use crate::models::{EnrichedDocument, RawRecord};
use crate::pool::Transform;
use crate::store::{DocumentStore, Keyspace};

/// Item-scoped failure. Counted as an error, logged, never propagated.
#[derive(Debug, Error)]
pub enum HardFailure {
    #[error("image fetch failed: {0}")]
    ImageFetch(String),
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedError),
    #[error("upsert failed: {0}")]
    Persistence(String),
}

/// Terminal state of one work item.
#[derive(Debug)]
pub enum Outcome {
    Completed,
    Skipped(SkipReason),
    Failed(HardFailure),
}

/// The transform the ingestion pool runs for every record.
///
/// Collaborators are injected once at construction and shared by all
/// workers.
pub struct Pipeline {
    filter: RecordFilter,
    accepted: Vec<ImageFormat>,
    fetcher: Arc<dyn ImageFetcher>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn DocumentStore>,
    keyspace: Keyspace,
}

impl Pipeline {
    pub fn new(
        filter: RecordFilter,
        accepted: Vec<ImageFormat>,
        fetcher: Arc<dyn ImageFetcher>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn DocumentStore>,
        keyspace: Keyspace,
    ) -> Self {
        Self {
            filter,
            accepted,
            fetcher,
            embedder,
            store,
            keyspace,
        }
    }

    pub async fn process(&self, record: &RawRecord) -> Outcome {
        if let Err(reason) = self.filter.check(record) {
            tracing::info!(id = %record.id, title = %record.title, "skipping: {}", reason);
            return Outcome::Skipped(reason);
        }
        // check() guarantees a non-empty poster URL
        let poster = record.poster_path.as_deref().unwrap_or_default();

        let bytes = match self.fetcher.fetch(poster).await {
            Ok(bytes) => bytes,
            Err(e) => return Outcome::Failed(HardFailure::ImageFetch(format!("{:#}", e))),
        };

        let format = image_check::identify(&bytes);
        if !self.accepted.contains(&format) {
            let reason = SkipReason::UnsupportedImageFormat(format.name().to_string());
            tracing::warn!(id = %record.id, title = %record.title, "skipping: {}", reason);
            return Outcome::Skipped(reason);
        }

        let embeddings = match self
            .embedder
            .embed_image(&bytes, record.overview.as_deref())
            .await
        {
            Ok(embeddings) => embeddings,
            Err(e) => return Outcome::Failed(HardFailure::Embedding(e)),
        };

        let doc = EnrichedDocument::from_record(
            record,
            self.embedder.model_name(),
            embeddings.image,
            embeddings.text,
        );

        match self.store.upsert(&self.keyspace, &doc).await {
            Ok(()) => Outcome::Completed,
            Err(e) => Outcome::Failed(HardFailure::Persistence(format!("{:#}", e))),
        }
    }
}

#[async_trait]
impl Transform for Pipeline {
    async fn run(&self, record: &RawRecord) -> Outcome {
        self.process(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::ImageEmbeddings;
    use crate::store::memory::InMemoryStore;
    use anyhow::{bail, Result};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    struct FixedFetcher {
        body: Vec<u8>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ImageFetcher for FixedFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if url.contains("404") {
                bail!("HTTP status client error (404 Not Found) for url ({})", url);
            }
            Ok(self.body.clone())
        }
    }

    struct TwoDims {
        fail: bool,
    }

    #[async_trait]
    impl Embedder for TwoDims {
        fn model_name(&self) -> &str {
            "two-dims"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_image(
            &self,
            _image: &[u8],
            context: Option<&str>,
        ) -> std::result::Result<ImageEmbeddings, EmbedError> {
            if self.fail {
                return Err(EmbedError::Transient("quota exceeded".into()));
            }
            Ok(ImageEmbeddings {
                image: vec![1.0, 0.0],
                text: context.map(|_| vec![0.0, 1.0]),
            })
        }
        async fn embed_text(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
            Ok(vec![0.0, 1.0])
        }
    }

    fn record(id: &str, title: &str, poster: &str) -> RawRecord {
        RawRecord {
            id: id.to_string(),
            title: title.to_string(),
            poster_path: Some(poster.to_string()),
            backdrop_path: None,
            overview: Some("a ship".to_string()),
            release_date: None,
            popularity: None,
            imdb_id: None,
        }
    }

    async fn pipeline(body: &[u8], fail_embed: bool) -> (Pipeline, Arc<FixedFetcher>, Arc<InMemoryStore>) {
        let fetcher = Arc::new(FixedFetcher {
            body: body.to_vec(),
            calls: AtomicUsize::new(0),
        });
        let store = Arc::new(InMemoryStore::new());
        let ks = Keyspace::new("movies", "data", "data");
        store.ensure_keyspace(&ks).await.unwrap();
        let p = Pipeline::new(
            RecordFilter::default(),
            vec![ImageFormat::Png, ImageFormat::Jpeg],
            fetcher.clone(),
            Arc::new(TwoDims { fail: fail_embed }),
            store.clone(),
            ks,
        );
        (p, fetcher, store)
    }

    #[tokio::test]
    async fn completed_document_is_stored() {
        let (p, _, store) = pipeline(PNG, false).await;
        let outcome = p.process(&record("1", "Nova", "http://x/ok.png")).await;
        assert!(matches!(outcome, Outcome::Completed), "{:?}", outcome);

        let ks = Keyspace::new("movies", "data", "data");
        let doc = store.get(&ks, "1").await.unwrap().unwrap();
        assert_eq!(doc.embedding_model, "two-dims");
        assert_eq!(doc.image_embedding, vec![1.0, 0.0]);
        assert_eq!(doc.text_embedding, Some(vec![0.0, 1.0]));
    }

    #[tokio::test]
    async fn filtered_record_never_fetches() {
        let (p, fetcher, _) = pipeline(PNG, false).await;
        let outcome = p.process(&record("2", "Ünïcode", "http://x/ok.png")).await;
        assert!(matches!(outcome, Outcome::Skipped(SkipReason::NonAsciiTitle)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unsupported_format_is_a_skip() {
        let (p, _, store) = pipeline(b"<html>not an image</html>", false).await;
        let outcome = p.process(&record("3", "Nova", "http://x/ok.png")).await;
        match outcome {
            Outcome::Skipped(SkipReason::UnsupportedImageFormat(kind)) => assert_eq!(kind, "Unknown"),
            other => panic!("unexpected outcome {:?}", other),
        }
        let ks = Keyspace::new("movies", "data", "data");
        assert_eq!(store.count(&ks).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn fetch_and_embed_failures_are_hard() {
        let (p, _, _) = pipeline(PNG, false).await;
        let outcome = p.process(&record("4", "Nova", "http://x/404.png")).await;
        assert!(matches!(outcome, Outcome::Failed(HardFailure::ImageFetch(_))));

        let (p, _, _) = pipeline(PNG, true).await;
        let outcome = p.process(&record("5", "Nova", "http://x/ok.png")).await;
        assert!(matches!(outcome, Outcome::Failed(HardFailure::Embedding(_))));
    }

    #[tokio::test]
    async fn missing_keyspace_is_persistence_failure() {
        let fetcher = Arc::new(FixedFetcher {
            body: PNG.to_vec(),
            calls: AtomicUsize::new(0),
        });
        let p = Pipeline::new(
            RecordFilter::default(),
            vec![ImageFormat::Png],
            fetcher,
            Arc::new(TwoDims { fail: false }),
            Arc::new(InMemoryStore::new()),
            Keyspace::new("movies", "data", "data"),
        );
        let outcome = p.process(&record("6", "Nova", "http://x/ok.png")).await;
        assert!(matches!(outcome, Outcome::Failed(HardFailure::Persistence(_))));
    }
}
