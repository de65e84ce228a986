//! TOML configuration parsing and load-time validation.
//!
//! Bad values (zero chunk size, unknown similarity metric, unknown embedding
//! provider, storage enabled without a bucket) are rejected here, before any
//! network activity begins.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::Error;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

fn default_max_chars() -> usize {
    1000
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Distance/score function used to rank chunk embeddings against a query
/// vector. Parsed from config; an unknown name is a configuration error,
/// never a per-query fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityMetric {
    Cosine,
    Euclidean,
    InnerProduct,
}

impl SimilarityMetric {
    /// Cosine and Euclidean are distances (lower is better); inner product
    /// is a score (higher is better).
    pub fn lower_is_better(&self) -> bool {
        !matches!(self, SimilarityMetric::InnerProduct)
    }
}

impl FromStr for SimilarityMetric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "cosine" => Ok(SimilarityMetric::Cosine),
            "euclidean" => Ok(SimilarityMetric::Euclidean),
            "inner_product" => Ok(SimilarityMetric::InnerProduct),
            other => Err(Error::Configuration(format!(
                "unsupported similarity metric: '{}'. Use cosine, euclidean, or inner_product.",
                other
            ))),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: i64,
    /// Candidate-pool multiplier for similarity search: the engine scores
    /// `overfetch_factor * top_k` chunk rows before deduplicating by paper.
    /// A tunable pool size, not a guaranteed ratio.
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: i64,
    #[serde(default = "default_metric")]
    pub metric: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            overfetch_factor: default_overfetch_factor(),
            metric: default_metric(),
        }
    }
}

fn default_top_k() -> i64 {
    10
}
fn default_overfetch_factor() -> i64 {
    10
}
fn default_metric() -> String {
    "cosine".to_string()
}

impl RetrievalConfig {
    pub fn metric(&self) -> Result<SimilarityMetric, Error> {
        self.metric.parse()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub save_pdf: bool,
    /// Deadline for each link fetch and PDF download, to bound hangs.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_openreview_page_size")]
    pub openreview_page_size: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            save_pdf: false,
            fetch_timeout_secs: default_fetch_timeout_secs(),
            openreview_page_size: default_openreview_page_size(),
        }
    }
}

fn default_workers() -> usize {
    5
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_openreview_page_size() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7431".to_string()
}

pub fn load_config(path: &Path) -> Result<Config, Error> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Configuration(format!("failed to read config file {}: {}", path.display(), e))
    })?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| Error::Configuration(format!("failed to parse config file: {}", e)))?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), Error> {
    if config.chunking.max_chars == 0 {
        return Err(Error::Configuration(
            "chunking.max_chars must be > 0".to_string(),
        ));
    }

    if config.retrieval.top_k < 1 {
        return Err(Error::Configuration(
            "retrieval.top_k must be >= 1".to_string(),
        ));
    }
    if config.retrieval.overfetch_factor < 1 {
        return Err(Error::Configuration(
            "retrieval.overfetch_factor must be >= 1".to_string(),
        ));
    }
    config.retrieval.metric()?;

    if config.crawl.workers == 0 {
        return Err(Error::Configuration(
            "crawl.workers must be >= 1".to_string(),
        ));
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "local" => {}
        other => {
            return Err(Error::Configuration(format!(
                "unknown embedding provider: '{}'. Use disabled, openai, or local.",
                other
            )))
        }
    }
    if config.embedding.is_enabled() && config.embedding.provider == "openai" {
        if config.embedding.model.is_none() {
            return Err(Error::Configuration(
                "embedding.model must be set for the openai provider".to_string(),
            ));
        }
        if config.embedding.dims.unwrap_or(0) == 0 {
            return Err(Error::Configuration(
                "embedding.dims must be > 0 for the openai provider".to_string(),
            ));
        }
    }

    if config.storage.enabled && config.storage.bucket.is_empty() {
        return Err(Error::Configuration(
            "storage.bucket must be set when storage is enabled".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(extra: &str) -> String {
        format!(
            r#"
[db]
path = "data/pdx.sqlite"

[chunking]
max_chars = 1000
{}
"#,
            extra
        )
    }

    #[test]
    fn parses_minimal_config() {
        let config: Config = toml::from_str(&base_config("")).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.retrieval.top_k, 10);
        assert_eq!(config.retrieval.overfetch_factor, 10);
        assert_eq!(config.crawl.workers, 5);
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn rejects_unknown_metric() {
        let config: Config =
            toml::from_str(&base_config("[retrieval]\nmetric = \"manhattan\"")).unwrap();
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn rejects_unknown_provider() {
        let config: Config =
            toml::from_str(&base_config("[embedding]\nprovider = \"cohere\"")).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_storage_without_bucket() {
        let config: Config = toml::from_str(&base_config("[storage]\nenabled = true")).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn metric_parse_directions() {
        assert!(SimilarityMetric::Cosine.lower_is_better());
        assert!(SimilarityMetric::Euclidean.lower_is_better());
        assert!(!SimilarityMetric::InnerProduct.lower_is_better());
    }
}
