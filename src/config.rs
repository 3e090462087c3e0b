use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub vector: VectorConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub lexical: LexicalConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    /// Snapshot file, rewritten after every add.
    pub path: PathBuf,
    #[serde(default = "default_dims")]
    pub dims: usize,
}

fn default_dims() -> usize {
    384
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Number of trailing sentences carried into the next chunk.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    2
}

/// Upper bound on `chunking.overlap`. Overlap counts sentences, so a few
/// already carry a lot of text into every chunk.
pub const MAX_OVERLAP_SENTENCES: usize = 10;

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Nearest neighbours requested from the vector index.
    #[serde(default = "default_k")]
    pub k: usize,
    /// Lexical hits kept as generation context candidates.
    #[serde(default = "default_lexical_limit")]
    pub lexical_limit: usize,
    /// Hits actually placed into the prompt.
    #[serde(default = "default_context_docs")]
    pub context_docs: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            lexical_limit: default_lexical_limit(),
            context_docs: default_context_docs(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_lexical_limit() -> usize {
    3
}
fn default_context_docs() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LexicalConfig {
    /// `sqlite` (FTS5 table inside `[db].path`) or `elasticsearch`.
    #[serde(default = "default_lexical_backend")]
    pub backend: String,
    #[serde(default = "default_es_url")]
    pub url: String,
    #[serde(default = "default_es_index")]
    pub index: String,
    /// Total attempts for an upsert that keeps timing out.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            backend: default_lexical_backend(),
            url: default_es_url(),
            index: default_es_index(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_lexical_backend() -> String {
    "sqlite".to_string()
}
fn default_es_url() -> String {
    "http://localhost:9200".to_string()
}
fn default_es_index() -> String {
    "documents".to_string()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// `sqlite` (table inside `[db].path`) or `memory`.
    #[serde(default = "default_cache_backend")]
    pub backend: String,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_cache_backend() -> String {
    "sqlite".to_string()
}
fn default_ttl_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_url")]
    pub url: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            url: default_generation_url(),
            model: default_generation_model(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_generation_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_generation_model() -> String {
    "mistral".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_max_upload_bytes() -> usize {
    16 * 1024 * 1024
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.overlap must be < chunking.chunk_size");
    }
    if config.chunking.overlap > MAX_OVERLAP_SENTENCES {
        anyhow::bail!(
            "chunking.overlap is a sentence count and must be <= {} (got {})",
            MAX_OVERLAP_SENTENCES,
            config.chunking.overlap
        );
    }

    // Validate retrieval
    if config.retrieval.k == 0 {
        anyhow::bail!("retrieval.k must be >= 1");
    }
    if config.retrieval.context_docs == 0
        || config.retrieval.context_docs > config.retrieval.lexical_limit
    {
        anyhow::bail!("retrieval.context_docs must be in [1, retrieval.lexical_limit]");
    }

    // Validate vector / embedding agreement
    if config.vector.dims == 0 {
        anyhow::bail!("vector.dims must be > 0");
    }
    if let Some(dims) = config.embedding.dims {
        if dims != config.vector.dims {
            anyhow::bail!(
                "embedding.dims ({}) must match vector.dims ({})",
                dims,
                config.vector.dims
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, ollama, or local.",
            other
        ),
    }
    if config.embedding.provider == "ollama" && config.embedding.model.is_none() {
        anyhow::bail!("embedding.model must be specified when provider is 'ollama'");
    }

    match config.lexical.backend.as_str() {
        "sqlite" | "elasticsearch" => {}
        other => anyhow::bail!(
            "Unknown lexical backend: '{}'. Must be sqlite or elasticsearch.",
            other
        ),
    }
    if config.lexical.max_attempts == 0 {
        anyhow::bail!("lexical.max_attempts must be >= 1");
    }

    match config.cache.backend.as_str() {
        "sqlite" | "memory" => {}
        other => anyhow::bail!(
            "Unknown cache backend: '{}'. Must be sqlite or memory.",
            other
        ),
    }

    if config.server.max_upload_bytes == 0 {
        anyhow::bail!("server.max_upload_bytes must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "/tmp/docqa.sqlite"

[vector]
path = "/tmp/docqa.vec"

[server]
bind = "127.0.0.1:0"
"#;

    #[test]
    fn test_defaults_follow_service_contract() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.vector.dims, 384);
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.overlap, 2);
        assert_eq!(config.retrieval.k, 5);
        assert_eq!(config.retrieval.lexical_limit, 3);
        assert_eq!(config.retrieval.context_docs, 2);
        assert_eq!(config.lexical.max_attempts, 3);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert_eq!(config.generation.model, "mistral");
        assert_eq!(config.server.max_upload_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn test_overlap_must_be_below_chunk_size() {
        let text = format!("{}\n[chunking]\nchunk_size = 10\noverlap = 10\n", MINIMAL);
        let config: Config = toml::from_str(&text).unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_overlap_is_bounded_in_sentences() {
        let text = format!("{}\n[chunking]\nchunk_size = 1000\noverlap = 100\n", MINIMAL);
        let config: Config = toml::from_str(&text).unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("sentence count"));

        let text = format!("{}\n[chunking]\nchunk_size = 1000\noverlap = 10\n", MINIMAL);
        let config: Config = toml::from_str(&text).unwrap();
        validate(&config).unwrap();
    }

    #[test]
    fn test_dims_mismatch_rejected() {
        let text = format!("{}\n[embedding]\nprovider = \"local\"\ndims = 768\n", MINIMAL);
        let config: Config = toml::from_str(&text).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let text = format!("{}\n[lexical]\nbackend = \"solr\"\n", MINIMAL);
        let config: Config = toml::from_str(&text).unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("solr"));
    }

    #[test]
    fn test_load_config_reports_missing_file() {
        let err = load_config(Path::new("/nonexistent/docqa.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
