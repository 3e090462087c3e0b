//! Embedding backends.
//!
//! Defines the [`Embedder`] trait and its implementations:
//! - **[`DisabledEmbedder`]**: always fails with `ModelUnavailable`.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalEmbedder`**: runs a fastembed model in-process; the model is
//!   loaded on first use and reused for every later call.
//!
//! Embedding is deterministic for a fixed model and has no side effects.
//! Failures are reported once and not retried; the caller decides whether
//! to abort.
//!
//! # Provider Selection
//!
//! | `[embedding].provider` | Backend |
//! |------------------------|---------|
//! | `"disabled"` | [`DisabledEmbedder`] |
//! | `"ollama"` | [`OllamaEmbedder`] |
//! | `"local"` | `LocalEmbedder` (feature `local-embeddings-fastembed`) |

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{RagError, RagResult};

/// Maps text to fixed-dimension dense vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> RagResult<Vec<f32>> {
    let results = embedder.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| RagError::ModelUnavailable("Empty embedding response".to_string()))
}

/// Reject a backend response that does not line up with the request.
pub fn check_shape(expected: usize, dims: usize, vectors: &[Vec<f32>]) -> RagResult<()> {
    if vectors.len() != expected {
        return Err(RagError::ModelUnavailable(format!(
            "embedding backend returned {} vectors for {} inputs",
            vectors.len(),
            expected
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(RagError::ModelUnavailable(format!(
            "embedding backend returned a {}-dimensional vector, expected {}",
            bad.len(),
            dims
        )));
    }
    Ok(())
}

// ============ Disabled ============

pub struct DisabledEmbedder {
    dims: usize,
}

impl DisabledEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, _texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        Err(RagError::ModelUnavailable(
            "Embedding provider is disabled".to_string(),
        ))
    }
}

// ============ Ollama ============

/// Embedder backed by a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default:
/// `http://localhost:11434`). Requires an embedding model to be pulled
/// (e.g. `ollama pull all-minilm`).
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let model = config
            .embedding
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let url = config
            .embedding
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.embedding.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims: config.vector.dims,
            url,
            client,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                RagError::ModelUnavailable(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(RagError::ModelUnavailable(format!(
                "Ollama API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RagError::ModelUnavailable(format!("Invalid Ollama response: {}", e)))?;
        let vectors = parse_ollama_response(&json)?;
        check_shape(texts.len(), self.dims, &vectors)?;
        Ok(vectors)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> RagResult<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            RagError::ModelUnavailable("Invalid Ollama response: missing embeddings array".into())
        })?;

    let mut result = Vec::with_capacity(embeddings.len());

    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| {
                RagError::ModelUnavailable(
                    "Invalid Ollama response: embedding is not an array".into(),
                )
            })?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }

    Ok(result)
}

// ============ Local (fastembed) ============

#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    fastembed_model: fastembed::EmbeddingModel,
    /// Loaded lazily, then shared by every call.
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let model_name = config
            .embedding
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let fastembed_model = config_to_fastembed_model(&model_name)?;

        Ok(Self {
            model_name,
            dims: config.vector.dims,
            batch_size: config.embedding.batch_size,
            fastembed_model,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> anyhow::Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        other => anyhow::bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, multilingual-e5-small",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let model = self.model.clone();
        let fastembed_model = self.fastembed_model.clone();
        let batch_size = self.batch_size;
        let input = texts.to_vec();

        let vectors = tokio::task::spawn_blocking(move || -> RagResult<Vec<Vec<f32>>> {
            let mut guard = model
                .lock()
                .map_err(|_| RagError::ModelUnavailable("embedding model lock poisoned".into()))?;
            if guard.is_none() {
                let loaded = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
                )
                .map_err(|e| {
                    RagError::ModelUnavailable(format!(
                        "Failed to initialize local embedding model: {}",
                        e
                    ))
                })?;
                *guard = Some(loaded);
            }
            let embedding = guard
                .as_mut()
                .ok_or_else(|| RagError::ModelUnavailable("embedding model not loaded".into()))?;
            embedding
                .embed(input, Some(batch_size))
                .map_err(|e| RagError::ModelUnavailable(format!("Local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| RagError::ModelUnavailable(format!("embedding task failed: {}", e)))??;

        check_shape(texts.len(), self.dims, &vectors)?;
        Ok(vectors)
    }
}

/// Build the embedder selected by `[embedding].provider`.
pub fn create_embedder(config: &Config) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.embedding.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder::new(config.vector.dims))),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => anyhow::bail!(
            "Local embedding provider requires --features local-embeddings-fastembed"
        ),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({ "embeddings": [[0.5, -1.0], [2.0, 0.0]] });
        let vectors = parse_ollama_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![0.5, -1.0], vec![2.0, 0.0]]);
    }

    #[test]
    fn test_parse_ollama_response_missing_field() {
        let json = serde_json::json!({ "error": "model not found" });
        let err = parse_ollama_response(&json).unwrap_err();
        assert!(matches!(err, RagError::ModelUnavailable(_)));
    }

    #[test]
    fn test_check_shape() {
        let vectors = vec![vec![0.0; 3], vec![0.0; 3]];
        assert!(check_shape(2, 3, &vectors).is_ok());
        assert!(check_shape(3, 3, &vectors).is_err());
        assert!(check_shape(2, 4, &vectors).is_err());
    }

    #[tokio::test]
    async fn test_disabled_embedder_is_unavailable() {
        let embedder = DisabledEmbedder::new(384);
        let err = embed_query(&embedder, "hello").await.unwrap_err();
        assert!(matches!(err, RagError::ModelUnavailable(_)));
        assert_eq!(embedder.dims(), 384);
    }
}
