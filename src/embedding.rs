//! Embedding provider abstraction and vector utilities.
//!
//! Concrete providers:
//! - **local** — fastembed models run in-process on a blocking thread; no
//!   network calls after the initial model download. Deterministic for a
//!   fixed model identifier.
//! - **openai** — `POST /v1/embeddings` with exponential backoff on 429/5xx.
//! - **disabled** — every embed call fails; selected when embeddings are
//!   not configured.
//!
//! Also provides the vector BLOB codec used for SQLite storage, the
//! per-metric scoring functions used by similarity search, and PDF text
//! extraction for the storage-event path.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::chunk::split_text;
use crate::config::{EmbeddingConfig, SimilarityMetric};
use crate::error::{Error, Result};

/// An embedding backend. Given fixed model configuration, `embed` is a pure
/// function of the input texts: one vector of dimension `dims()` per text,
/// in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Chunk an abstract (or any document text) and embed each chunk.
///
/// Empty input text yields an empty vector sequence, not an error.
pub async fn embed_abstract(
    provider: &dyn EmbeddingProvider,
    max_chars: usize,
    text: &str,
) -> Result<Vec<Vec<f32>>> {
    let chunks = split_text(text, max_chars);
    if chunks.is_empty() {
        return Ok(Vec::new());
    }
    provider.embed(&chunks).await
}

/// Extract plain text from PDF bytes.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes)
        .map(|t| t.trim().to_string())
        .map_err(|e| Error::Embedding(format!("PDF text extraction failed: {}", e)))
}

/// Create the provider named by the configuration.
///
/// Unknown provider names are rejected by config validation; this only sees
/// `disabled`, `openai`, or `local`.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => Err(Error::Configuration(
            "local embedding provider requires --features local-embeddings".to_string(),
        )),
        other => Err(Error::Configuration(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

// ============ Disabled Provider ============

/// Fails every embed call. Selected when `embedding.provider = "disabled"`.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::Embedding(
            "embedding provider is disabled; set [embedding] provider in config".to_string(),
        ))
    }
}

// ============ OpenAI Provider ============

/// Calls the OpenAI embeddings API. Requires `OPENAI_API_KEY`.
///
/// Retry strategy: 429 and 5xx retry with exponential backoff (1s, 2s, 4s,
/// ... capped at 2^5); other 4xx fail immediately; network errors retry.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    max_retries: u32,
    timeout_secs: u64,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            Error::Configuration("embedding.model required for the openai provider".to_string())
        })?;
        let dims = config.dims.ok_or_else(|| {
            Error::Configuration("embedding.dims required for the openai provider".to_string())
        })?;
        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(Error::Configuration(
                "OPENAI_API_KEY environment variable not set".to_string(),
            ));
        }
        Ok(Self {
            model,
            dims,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Embedding("OPENAI_API_KEY not set".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| Error::Embedding(e.to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post("https://api.openai.com/v1/embeddings")
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| Error::Embedding(e.to_string()))?;
                        return parse_openai_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(Error::Embedding(format!(
                            "OpenAI API error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    return Err(Error::Embedding(format!(
                        "OpenAI API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(Error::Embedding(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::Embedding("embedding failed after retries".to_string())))
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::Embedding("invalid OpenAI response: missing data array".into()))?;

    let mut embeddings = Vec::with_capacity(data.len());

    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| Error::Embedding("invalid OpenAI response: missing embedding".into()))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }

    Ok(embeddings)
}

// ============ Local Provider (fastembed) ============

/// In-process embedding via fastembed. The model is fetched from Hugging
/// Face on first use and cached; after that, embedding runs offline.
#[cfg(feature = "local-embeddings")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
}

#[cfg(feature = "local-embeddings")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        // Validate the name up front so bad config fails at startup.
        fastembed_model(&model_name)?;

        let dims = config.dims.unwrap_or(match model_name.as_str() {
            "all-minilm-l6-v2" | "bge-small-en-v1.5" => 384,
            "bge-base-en-v1.5" | "nomic-embed-text-v1.5" => 768,
            "bge-large-en-v1.5" => 1024,
            _ => 384,
        });

        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
        })
    }
}

#[cfg(feature = "local-embeddings")]
fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => Err(Error::Configuration(format!(
            "unknown local embedding model: '{}'. Supported: all-minilm-l6-v2, \
             bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, nomic-embed-text-v1.5",
            other
        ))),
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = fastembed_model(&self.model_name)?;
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut embedder = fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(model).with_show_download_progress(false),
            )
            .map_err(|e| Error::Embedding(format!("failed to initialize local model: {}", e)))?;

            embedder
                .embed(texts, Some(batch_size))
                .map_err(|e| Error::Embedding(format!("local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| Error::Embedding(format!("embedding task panicked: {}", e)))?
    }
}

// ============ Vector codec ============

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
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

// ============ Metric scoring ============

/// Score a stored chunk vector against a query vector under `metric`.
///
/// Cosine and Euclidean produce distances (lower is better); inner product
/// produces a score (higher is better). Direction is carried by
/// [`SimilarityMetric::lower_is_better`].
pub fn score_vectors(metric: SimilarityMetric, query: &[f32], candidate: &[f32]) -> f64 {
    match metric {
        SimilarityMetric::Cosine => 1.0 - cosine_similarity(query, candidate) as f64,
        SimilarityMetric::Euclidean => {
            let sum: f32 = query
                .iter()
                .zip(candidate.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            sum.sqrt() as f64
        }
        SimilarityMetric::InnerProduct => query
            .iter()
            .zip(candidate.iter())
            .map(|(a, b)| (a * b) as f64)
            .sum(),
    }
}

/// Cosine similarity in `[-1, 1]`; 0.0 for empty or mismatched vectors.
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
    fn vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_distance_is_zero_for_identical() {
        let v = vec![0.5, 0.5];
        let d = score_vectors(SimilarityMetric::Cosine, &v, &v);
        assert!(d.abs() < 1e-6);
    }

    #[test]
    fn euclidean_distance() {
        let a = vec![0.0, 0.0];
        let b = vec![3.0, 4.0];
        let d = score_vectors(SimilarityMetric::Euclidean, &a, &b);
        assert!((d - 5.0).abs() < 1e-6);
    }

    #[test]
    fn inner_product_score() {
        let a = vec![1.0, 2.0];
        let b = vec![3.0, 4.0];
        let s = score_vectors(SimilarityMetric::InnerProduct, &a, &b);
        assert!((s - 11.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_pdf_bytes_error() {
        let err = extract_pdf_text(b"not a pdf").unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }

    #[tokio::test]
    async fn disabled_provider_errors() {
        let err = DisabledProvider
            .embed(&["hello".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }
}
