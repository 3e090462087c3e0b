//! Shared service handles.
//!
//! [`Services`] is built once at start-up and cloned into every request
//! handler and pipeline; all backends sit behind `Arc`s so a clone is cheap.

use std::sync::Arc;

use crate::cache::{create_cache, ResultCache};
use crate::chunk::Chunker;
use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, Embedder};
use crate::error::RagResult;
use crate::generation::{Generator, OllamaGenerator};
use crate::ingest::IngestionPipeline;
use crate::ledger::LinkLedger;
use crate::lexical::{create_lexical, LexicalIndexGateway};
use crate::migrate;
use crate::models::LexicalDocument;
use crate::query::QueryPipeline;
use crate::vector_index::VectorIndex;

/// Tunables the pipelines read on every request.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub chunk_size: usize,
    pub overlap: usize,
    pub k: usize,
    pub lexical_limit: usize,
    pub context_docs: usize,
    pub max_upload_bytes: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.chunking.chunk_size,
            overlap: config.chunking.overlap,
            k: config.retrieval.k,
            lexical_limit: config.retrieval.lexical_limit,
            context_docs: config.retrieval.context_docs,
            max_upload_bytes: config.server.max_upload_bytes,
        }
    }

    pub fn chunker(&self) -> Chunker {
        Chunker::new(self.chunk_size, self.overlap)
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 2,
            k: 5,
            lexical_limit: 3,
            context_docs: 2,
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Clone)]
pub struct Services {
    pub embedder: Arc<dyn Embedder>,
    pub vectors: Arc<VectorIndex>,
    pub lexical: Arc<LexicalIndexGateway>,
    pub cache: Arc<ResultCache>,
    pub generator: Arc<dyn Generator>,
    pub ledger: Arc<LinkLedger>,
    pub settings: PipelineSettings,
}

impl Services {
    /// Open the database, apply migrations, make sure the lexical index
    /// exists and load the vector snapshot.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;

        let lexical = create_lexical(config, &pool)?;
        lexical.ensure_index().await?;

        let vectors = VectorIndex::open(&config.vector.path, config.vector.dims)?;
        let embedder = create_embedder(config)?;
        let cache = create_cache(config, &pool)?;
        let generator = OllamaGenerator::new(config)?;

        tracing::info!(
            embedder = embedder.model_name(),
            lexical = lexical.backend_name(),
            cache = %config.cache.backend,
            generator = generator.model_name(),
            vectors = vectors.len(),
            "services ready"
        );

        Ok(Self {
            embedder,
            vectors: Arc::new(vectors),
            lexical: Arc::new(lexical),
            cache: Arc::new(cache),
            generator: Arc::new(generator),
            ledger: Arc::new(LinkLedger::new(pool)),
            settings: PipelineSettings::from_config(config),
        })
    }

    pub fn ingestion(&self) -> IngestionPipeline {
        IngestionPipeline::new(self.clone())
    }

    pub fn query(&self) -> QueryPipeline {
        QueryPipeline::new(self.clone())
    }

    /// Look up one lexical document by chunk id.
    pub async fn get_chunk(&self, id: &str) -> RagResult<Option<LexicalDocument>> {
        self.lexical.get_by_id(id).await
    }

    /// Remove a chunk's lexical document and its ledger row. The vector
    /// stays in the append-only index but can no longer be reached through
    /// `embedding_id`.
    pub async fn delete_chunk(&self, id: &str) -> RagResult<bool> {
        let deleted = self.lexical.delete_by_id(id).await?;
        let forgotten = self.ledger.forget(id).await?;
        tracing::info!(doc_id = id, deleted, forgotten, "chunk deleted");
        Ok(deleted || forgotten)
    }
}
