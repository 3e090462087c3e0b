//! Ingestion pipeline orchestration.
//!
//! Coordinates the flow for one uploaded document: validation → text
//! extraction → chunking → embedding → per-chunk dual-index write. The first
//! failing step aborts the document; chunks already written stay indexed
//! and any chunk whose lexical write did not land is left unlinked in the
//! ledger for [`repair`](crate::repair).

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Instant;

use crate::config::Config;
use crate::error::{RagError, RagResult};
use crate::extract::{detect_file_type, extract_text};
use crate::ledger::PendingLink;
use crate::models::{chunk_doc_id, IngestReport};
use crate::services::Services;

pub struct IngestionPipeline {
    services: Services,
}

impl IngestionPipeline {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// Ingest `bytes` under `document_name`.
    ///
    /// Name, size and type are checked before any other work. Each chunk's
    /// vector is added and its lexical document indexed before the next
    /// chunk starts, so positions follow chunk order.
    pub async fn ingest(&self, document_name: &str, bytes: &[u8]) -> RagResult<IngestReport> {
        let started = Instant::now();
        let result = self.ingest_inner(document_name, bytes).await;
        match &result {
            Ok(report) => tracing::info!(
                document = document_name,
                chunks = report.indexed_chunk_count,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "ingestion complete"
            ),
            Err(e) => tracing::error!(
                document = document_name,
                kind = e.kind(),
                error = %e,
                "ingestion failed"
            ),
        }
        result
    }

    async fn ingest_inner(&self, document_name: &str, bytes: &[u8]) -> RagResult<IngestReport> {
        let settings = &self.services.settings;

        if document_name.trim().is_empty() {
            return Err(RagError::InvalidInput("document name is empty".to_string()));
        }
        if bytes.len() > settings.max_upload_bytes {
            return Err(RagError::PayloadTooLarge {
                size: bytes.len(),
                max: settings.max_upload_bytes,
            });
        }
        let file_type = detect_file_type(document_name, bytes)?;
        tracing::info!(
            document = document_name,
            bytes = bytes.len(),
            mime = file_type.mime(),
            "document received"
        );

        let text = extract_text(bytes, file_type)?;
        tracing::debug!(document = document_name, chars = text.chars().count(), "text extracted");

        let chunks = settings.chunker().chunk(&text);
        if chunks.is_empty() {
            return Err(RagError::EmptyDocument(document_name.to_string()));
        }
        tracing::info!(document = document_name, chunks = chunks.len(), "document chunked");

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.services.embedder.embed(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(RagError::ModelUnavailable(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }
        tracing::info!(
            document = document_name,
            model = self.services.embedder.model_name(),
            "chunks embedded"
        );

        let metadata = serde_json::json!({ "source": document_name });
        let mut positions = Vec::with_capacity(chunks.len());

        for (chunk, vector) in chunks.iter().zip(vectors) {
            let position = self
                .services
                .vectors
                .add_async(vec![vector])
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| RagError::IndexWrite("vector index assigned no position".into()))?;

            let doc_id = chunk_doc_id(document_name, chunk.ordinal);
            let link = PendingLink {
                doc_id: doc_id.clone(),
                document_name: document_name.to_string(),
                ordinal: chunk.ordinal,
                embedding_id: position,
                content: chunk.text.clone(),
            };
            if let Err(e) = self.services.ledger.record(&link).await {
                // Repair cannot see this position
                tracing::error!(
                    doc_id = %doc_id,
                    position,
                    error = %e,
                    "vector written but ledger row missing"
                );
                return Err(e);
            }

            self.services
                .lexical
                .index_document(&doc_id, &chunk.text, metadata.clone(), position)
                .await?;
            self.services.ledger.mark_linked(&doc_id).await?;

            tracing::debug!(doc_id = %doc_id, position, "chunk indexed");
            positions.push(position);
        }

        Ok(IngestReport {
            document: document_name.to_string(),
            indexed_chunk_count: positions.len(),
            positions,
        })
    }
}

/// CLI entry: ingest one file from disk.
pub async fn run_ingest(config: &Config, path: &Path, name: Option<String>) -> Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = match name {
        Some(n) => n,
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow::anyhow!("Cannot derive a document name from {}", path.display()))?,
    };

    let services = Services::from_config(config).await?;
    let report = services.ingestion().ingest(&name, &bytes).await?;

    println!("ingest {}", report.document);
    println!("  chunks indexed: {}", report.indexed_chunk_count);
    if let (Some(first), Some(last)) = (report.positions.first(), report.positions.last()) {
        println!("  vector positions: {}..={}", first, last);
    }
    println!("ok");
    Ok(())
}
