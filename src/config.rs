//! TOML configuration.
//!
//! Every command reads the same file (`--config`, default
//! `./config/reel.toml`). Each section carries serde defaults so a partial
//! file is enough; [`Config::minimal`] is the all-defaults configuration used
//! when no file exists.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::image_check::ImageFormat;
use crate::store::Keyspace;

/// Smallest positive `ingest.ops_ceiling`: one dispatch every ~17 minutes.
pub const MIN_OPS_CEILING: f64 = 0.001;
/// Upper bound on `crawler.max_retries`.
pub const MAX_CRAWLER_RETRIES: u32 = 10;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub keyspace: KeyspaceConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/reel.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct KeyspaceConfig {
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for KeyspaceConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            scope: default_scope(),
            collection: default_collection(),
        }
    }
}

fn default_bucket() -> String {
    "movies".to_string()
}
fn default_scope() -> String {
    "data".to_string()
}
fn default_collection() -> String {
    "data".to_string()
}

impl KeyspaceConfig {
    pub fn keyspace(&self) -> Keyspace {
        Keyspace::new(&self.bucket, &self.scope, &self.collection)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Base URL override for the prediction endpoint (tests, proxies).
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dims: default_dims(),
            project: None,
            region: default_region(),
            endpoint: None,
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "multimodalembedding@001".to_string()
}
fn default_dims() -> usize {
    1408
}
fn default_region() -> String {
    "us-central1".to_string()
}
fn default_embed_timeout_secs() -> u64 {
    120
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Target dispatches per second; `<= 0` disables the throttle.
    #[serde(default = "default_ops_ceiling")]
    pub ops_ceiling: f64,
    #[serde(default)]
    pub dispatch_delay_ms: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_skip_non_ascii")]
    pub skip_non_ascii_titles: bool,
    #[serde(default = "default_accepted_formats")]
    pub accepted_formats: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: default_queue_depth(),
            ops_ceiling: default_ops_ceiling(),
            dispatch_delay_ms: 0,
            fetch_timeout_secs: default_fetch_timeout_secs(),
            skip_non_ascii_titles: default_skip_non_ascii(),
            accepted_formats: default_accepted_formats(),
        }
    }
}

fn default_workers() -> usize {
    4
}
fn default_queue_depth() -> usize {
    8
}
fn default_ops_ceiling() -> f64 {
    1.75
}
fn default_fetch_timeout_secs() -> u64 {
    120
}
fn default_skip_non_ascii() -> bool {
    true
}
fn default_accepted_formats() -> Vec<String> {
    ["BMP", "GIF", "JPEG", "PNG"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl IngestConfig {
    /// Parse `accepted_formats` into image formats. Unknown names are an error.
    pub fn accepted_formats(&self) -> Result<Vec<ImageFormat>> {
        self.accepted_formats
            .iter()
            .map(|name| {
                ImageFormat::from_name(name)
                    .ok_or_else(|| anyhow::anyhow!("ingest.accepted_formats: unknown format '{}'", name))
            })
            .collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_name")]
    pub name: String,
    #[serde(default = "default_index_field")]
    pub field: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: default_index_name(),
            field: default_index_field(),
        }
    }
}

fn default_index_name() -> String {
    "movie_vector".to_string()
}
fn default_index_field() -> String {
    "image_embedding".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_result_limit")]
    pub result_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            result_limit: default_result_limit(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_result_limit() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlerConfig {
    #[serde(default = "default_crawler_host")]
    pub host: String,
    #[serde(default = "default_image_base")]
    pub image_base: String,
    #[serde(default = "default_crawler_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_crawler_retries")]
    pub max_retries: u32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            host: default_crawler_host(),
            image_base: default_image_base(),
            concurrency: default_crawler_concurrency(),
            max_retries: default_crawler_retries(),
        }
    }
}

fn default_crawler_host() -> String {
    "https://api.themoviedb.org".to_string()
}
fn default_image_base() -> String {
    "https://image.tmdb.org/t/p/original".to_string()
}
fn default_crawler_concurrency() -> usize {
    8
}
fn default_crawler_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// All-defaults configuration.
    pub fn minimal() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.ingest.workers == 0 {
            bail!("ingest.workers must be >= 1");
        }
        if self.ingest.queue_depth == 0 {
            bail!("ingest.queue_depth must be >= 1");
        }
        if !self.ingest.ops_ceiling.is_finite() {
            bail!("ingest.ops_ceiling must be a finite number");
        }
        if self.ingest.ops_ceiling > 0.0 && self.ingest.ops_ceiling < MIN_OPS_CEILING {
            bail!("ingest.ops_ceiling must be 0 or at least {}", MIN_OPS_CEILING);
        }
        if self.crawler.max_retries > MAX_CRAWLER_RETRIES {
            bail!("crawler.max_retries must be <= {}", MAX_CRAWLER_RETRIES);
        }
        if self.embedding.dims == 0 {
            bail!("embedding.dims must be > 0");
        }
        if self.server.result_limit == 0 {
            bail!("server.result_limit must be >= 1");
        }
        if self.crawler.concurrency == 0 {
            bail!("crawler.concurrency must be >= 1");
        }
        self.ingest.accepted_formats()?;

        match self.embedding.provider.as_str() {
            "disabled" | "local" => {}
            "vertex" => {
                if self.embedding.project.is_none() {
                    bail!("embedding.project must be specified when provider is 'vertex'");
                }
            }
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, vertex, or local.",
                other
            ),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.keyspace.keyspace().to_string(), "movies.data.data");
        assert_eq!(cfg.embedding.dims, 1408);
        assert_eq!(cfg.index.name, "movie_vector");
        assert_eq!(cfg.index.field, "image_embedding");
        assert!((cfg.ingest.ops_ceiling - 1.75).abs() < f64::EPSILON);
        assert!(cfg.ingest.skip_non_ascii_titles);
        assert_eq!(cfg.ingest.accepted_formats().unwrap().len(), 4);
    }

    #[test]
    fn vertex_requires_project() {
        let cfg: Config = toml::from_str("[embedding]\nprovider = \"vertex\"\n").unwrap();
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("embedding.project"), "{}", err);
    }

    #[test]
    fn rejects_unknown_provider() {
        let cfg: Config = toml::from_str("[embedding]\nprovider = \"openai\"\n").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_workers() {
        let cfg: Config = toml::from_str("[ingest]\nworkers = 0\n").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_finite_ops_ceiling() {
        for value in ["inf", "-inf", "nan"] {
            let cfg: Config = toml::from_str(&format!("[ingest]\nops_ceiling = {}\n", value)).unwrap();
            let err = cfg.validate().unwrap_err().to_string();
            assert!(err.contains("ingest.ops_ceiling"), "{}: {}", value, err);
        }
    }

    #[test]
    fn ops_ceiling_bounds() {
        let cfg: Config = toml::from_str("[ingest]\nops_ceiling = 1e-300\n").unwrap();
        assert!(cfg.validate().is_err());
        for ok in ["0.0", "-1.0", "0.001", "1.75", "50.0"] {
            let cfg: Config = toml::from_str(&format!("[ingest]\nops_ceiling = {}\n", ok)).unwrap();
            cfg.validate().unwrap();
        }
    }

    #[test]
    fn rejects_excessive_crawler_retries() {
        let cfg: Config = toml::from_str("[crawler]\nmax_retries = 32\n").unwrap();
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("crawler.max_retries"), "{}", err);
    }

    #[test]
    fn rejects_unknown_image_format() {
        let cfg: Config = toml::from_str("[ingest]\naccepted_formats = [\"PNG\", \"TIFF\"]\n").unwrap();
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("TIFF"), "{}", err);
    }
}
