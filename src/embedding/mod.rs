//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`DisabledEmbedder`]**: returns errors; used when embeddings are not configured.
//! - **[`VertexEmbedder`]**: calls the Vertex AI multimodal embedding `:predict` endpoint.
//! - **`LocalEmbedder`**: CLIP image and text models via fastembed
//!   (feature `local-embeddings-fastembed`); no network calls after model download.
//!
//! Also provides vector utilities used by the document store:
//! - [`cosine_similarity`]: compute similarity between two embedding vectors
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`]: decode a SQLite BLOB back into a `Vec<f32>`
//!
//! # Failure Policy
//!
//! Providers never retry. A call costs real quota, so any non-success
//! response is returned to the caller as a typed [`EmbedError`]:
//! - HTTP 429 and 5xx, timeouts, connection errors → [`EmbedError::Transient`]
//! - other HTTP 4xx → [`EmbedError::Rejected`]
//! - missing vectors or a dimension mismatch → [`EmbedError::Malformed`]

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use std::time::Duration;
use thiserror::Error;

use crate::config::EmbeddingConfig;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding provider is disabled")]
    Disabled,
    #[error("transient embedding failure: {0}")]
    Transient(String),
    #[error("embedding request rejected: {0}")]
    Rejected(String),
    #[error("malformed embedding response: {0}")]
    Malformed(String),
}

/// Result of a multimodal call: the image vector plus the vector of the
/// contextual text, when text was supplied.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageEmbeddings {
    pub image: Vec<f32>,
    pub text: Option<Vec<f32>>,
}

/// Trait for embedding providers.
///
/// Injected once into the pipeline and shared by every worker, so
/// implementations must be `Send + Sync`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier recorded on every document as provenance.
    fn model_name(&self) -> &str;
    /// Dimensionality of every returned vector.
    fn dims(&self) -> usize;

    /// Embed an image together with optional contextual text.
    async fn embed_image(
        &self,
        image: &[u8],
        context: Option<&str>,
    ) -> std::result::Result<ImageEmbeddings, EmbedError>;

    /// Embed text alone (query path).
    async fn embed_text(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedError>;
}

/// Startup connectivity check: embed a throwaway string.
pub async fn check_provider(embedder: &dyn Embedder) -> Result<()> {
    let vector = embedder
        .embed_text("test")
        .await
        .with_context(|| format!("Can not invoke embedding model '{}'", embedder.model_name()))?;
    if vector.len() != embedder.dims() {
        bail!(
            "embedding model '{}' returned {} dimensions, expected {}",
            embedder.model_name(),
            vector.len(),
            embedder.dims()
        );
    }
    Ok(())
}

fn ensure_dims(vector: Vec<f32>, dims: usize) -> std::result::Result<Vec<f32>, EmbedError> {
    if vector.len() != dims {
        return Err(EmbedError::Malformed(format!(
            "expected {} dimensions, got {}",
            dims,
            vector.len()
        )));
    }
    Ok(vector)
}

// ============ Disabled Provider ============

/// An embedding provider that always fails.
///
/// Used when `embedding.provider = "disabled"` in the configuration.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }

    async fn embed_image(
        &self,
        _image: &[u8],
        _context: Option<&str>,
    ) -> std::result::Result<ImageEmbeddings, EmbedError> {
        Err(EmbedError::Disabled)
    }

    async fn embed_text(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
        Err(EmbedError::Disabled)
    }
}

// ============ Vertex AI Provider ============

/// Embedding provider using the Vertex AI multimodal embedding model.
///
/// Calls `POST {endpoint}/v1/projects/{project}/locations/{region}/publishers/google/models/{model}:predict`.
/// Authentication happens out of band: the bearer token is read from the
/// `VERTEX_ACCESS_TOKEN` environment variable (for example the output of
/// `gcloud auth print-access-token`).
pub struct VertexEmbedder {
    client: reqwest::Client,
    url: String,
    token: String,
    model: String,
    dims: usize,
}

impl VertexEmbedder {
    /// Create a new Vertex provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `project` is not set in config or if
    /// `VERTEX_ACCESS_TOKEN` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let token = std::env::var("VERTEX_ACCESS_TOKEN")
            .map_err(|_| anyhow::anyhow!("VERTEX_ACCESS_TOKEN environment variable not set"))?;
        Self::with_token(config, token)
    }

    pub fn with_token(config: &EmbeddingConfig, token: String) -> Result<Self> {
        let project = config
            .project
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("embedding.project required for Vertex provider"))?;

        let base = config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}-aiplatform.googleapis.com", config.region));
        let url = format!(
            "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:predict",
            base.trim_end_matches('/'),
            project,
            config.region,
            config.model
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url,
            token,
            model: config.model.clone(),
            dims: config.dims,
        })
    }

    async fn predict(
        &self,
        instance: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, EmbedError> {
        let body = serde_json::json!({
            "instances": [instance],
            "parameters": { "dimension": self.dims },
        });

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| EmbedError::Malformed(e.to_string()));
        }

        let body_text = response.text().await.unwrap_or_default();
        let message = format!("Vertex AI error {}: {}", status, body_text);
        if status.as_u16() == 429 || status.is_server_error() {
            Err(EmbedError::Transient(message))
        } else {
            Err(EmbedError::Rejected(message))
        }
    }
}

/// Extract `predictions[0].<key>` as a float vector.
fn prediction_vector(json: &serde_json::Value, key: &str) -> Option<Vec<f32>> {
    json.get("predictions")
        .and_then(|p| p.get(0))
        .and_then(|p| p.get(key))
        .and_then(|v| v.as_array())
        .map(|values| {
            values
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect()
        })
}

#[async_trait]
impl Embedder for VertexEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_image(
        &self,
        image: &[u8],
        context: Option<&str>,
    ) -> std::result::Result<ImageEmbeddings, EmbedError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let mut instance = serde_json::json!({
            "image": { "bytesBase64Encoded": encoded },
        });
        let context = context.filter(|t| !t.trim().is_empty());
        if let Some(text) = context {
            instance["text"] = serde_json::Value::String(text.to_string());
        }

        let json = self.predict(instance).await?;
        let image_vec = prediction_vector(&json, "imageEmbedding")
            .ok_or_else(|| EmbedError::Malformed("missing imageEmbedding".to_string()))?;
        let text_vec = match context {
            Some(_) => Some(ensure_dims(
                prediction_vector(&json, "textEmbedding")
                    .ok_or_else(|| EmbedError::Malformed("missing textEmbedding".to_string()))?,
                self.dims,
            )?),
            None => None,
        };

        Ok(ImageEmbeddings {
            image: ensure_dims(image_vec, self.dims)?,
            text: text_vec,
        })
    }

    async fn embed_text(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
        let json = self
            .predict(serde_json::json!({ "text": text }))
            .await?;
        let vector = prediction_vector(&json, "textEmbedding")
            .ok_or_else(|| EmbedError::Malformed("missing textEmbedding".to_string()))?;
        ensure_dims(vector, self.dims)
    }
}

// ============ Local Provider (fastembed CLIP) ============

/// CLIP ViT-B/32 image and text encoders run in-process.
///
/// Both encoders share one 512-dimensional space. Models are downloaded on
/// first use from Hugging Face and cached.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    image_model: std::sync::Arc<std::sync::Mutex<fastembed::ImageEmbedding>>,
    text_model: std::sync::Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    pub const MODEL_NAME: &'static str = "clip-vit-b-32";
    pub const DIMS: usize = 512;

    pub fn new() -> Result<Self> {
        let image_model = fastembed::ImageEmbedding::try_new(
            fastembed::ImageInitOptions::new(fastembed::ImageEmbeddingModel::ClipVitB32)
                .with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local image model: {}", e))?;
        let text_model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed::EmbeddingModel::ClipVitB32)
                .with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local text model: {}", e))?;

        Ok(Self {
            image_model: std::sync::Arc::new(std::sync::Mutex::new(image_model)),
            text_model: std::sync::Arc::new(std::sync::Mutex::new(text_model)),
        })
    }

    async fn run_text(&self, text: String) -> std::result::Result<Vec<f32>, EmbedError> {
        let model = self.text_model.clone();
        let mut vectors = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| EmbedError::Transient("text model lock poisoned".to_string()))?;
            model
                .embed(vec![text], None)
                .map_err(|e| EmbedError::Transient(e.to_string()))
        })
        .await
        .map_err(|e| EmbedError::Transient(e.to_string()))??;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::Malformed("empty text embedding".to_string()))
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        Self::MODEL_NAME
    }
    fn dims(&self) -> usize {
        Self::DIMS
    }

    async fn embed_image(
        &self,
        image: &[u8],
        context: Option<&str>,
    ) -> std::result::Result<ImageEmbeddings, EmbedError> {
        let model = self.image_model.clone();
        let bytes = image.to_vec();
        let mut vectors = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| EmbedError::Transient("image model lock poisoned".to_string()))?;
            model
                .embed_bytes(&[bytes.as_slice()], None)
                .map_err(|e| EmbedError::Rejected(e.to_string()))
        })
        .await
        .map_err(|e| EmbedError::Transient(e.to_string()))??;
        let image_vec = vectors
            .pop()
            .ok_or_else(|| EmbedError::Malformed("empty image embedding".to_string()))?;

        let text = match context.filter(|t| !t.trim().is_empty()) {
            Some(t) => Some(ensure_dims(self.run_text(t.to_string()).await?, Self::DIMS)?),
            None => None,
        };

        Ok(ImageEmbeddings {
            image: ensure_dims(image_vec, Self::DIMS)?,
            text,
        })
    }

    async fn embed_text(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
        ensure_dims(self.run_text(text.to_string()).await?, Self::DIMS)
    }
}

/// Dimension the configured provider produces, without constructing it.
pub fn index_dims(config: &EmbeddingConfig) -> usize {
    match config.provider.as_str() {
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => LocalEmbedder::DIMS,
        _ => config.dims,
    }
}

/// Create the appropriate [`Embedder`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"vertex"` | [`VertexEmbedder`] |
/// | `"local"` | `LocalEmbedder` (feature `local-embeddings-fastembed`) |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledEmbedder)),
        "vertex" => Ok(Box::new(VertexEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Box::new(LocalEmbedder::new()?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use reelvec::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn parses_prediction_vectors() {
        let json = serde_json::json!({
            "predictions": [{ "imageEmbedding": [0.5, -1.0], "textEmbedding": [1, 2] }]
        });
        assert_eq!(prediction_vector(&json, "imageEmbedding"), Some(vec![0.5, -1.0]));
        assert_eq!(prediction_vector(&json, "textEmbedding"), Some(vec![1.0, 2.0]));
        assert_eq!(prediction_vector(&json, "videoEmbeddings"), None);
        assert_eq!(prediction_vector(&serde_json::json!({}), "imageEmbedding"), None);
    }

    #[test]
    fn dimension_mismatch_is_malformed() {
        assert!(matches!(
            ensure_dims(vec![1.0, 2.0], 3),
            Err(EmbedError::Malformed(_))
        ));
        assert_eq!(ensure_dims(vec![1.0], 1).unwrap(), vec![1.0]);
    }

    #[tokio::test]
    async fn disabled_provider_always_fails() {
        let e = DisabledEmbedder;
        assert!(matches!(e.embed_text("x").await, Err(EmbedError::Disabled)));
        assert!(matches!(
            e.embed_image(&[1, 2, 3], None).await,
            Err(EmbedError::Disabled)
        ));
        assert!(check_provider(&e).await.is_err());
    }

    #[test]
    fn vertex_url_from_config() {
        let cfg = EmbeddingConfig {
            provider: "vertex".to_string(),
            project: Some("my-proj".to_string()),
            ..EmbeddingConfig::default()
        };
        let e = VertexEmbedder::with_token(&cfg, "tok".to_string()).unwrap();
        assert_eq!(
            e.url,
            "https://us-central1-aiplatform.googleapis.com/v1/projects/my-proj/locations/us-central1/publishers/google/models/multimodalembedding@001:predict"
        );
        assert_eq!(e.dims(), 1408);
    }

    #[test]
    fn vertex_requires_project() {
        let cfg = EmbeddingConfig {
            provider: "vertex".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(VertexEmbedder::with_token(&cfg, "tok".to_string()).is_err());
    }
}
