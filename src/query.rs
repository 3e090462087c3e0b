//! Query pipeline.
//!
//! cache lookup → query embedding → vector search → lexical search (text OR
//! vector positions) → context fusion → generation → cache write.
//!
//! Only generated answers are cached. The "no results" answer and every
//! error are recomputed on the next identical query.

use anyhow::Result;
use std::time::Instant;

use crate::config::Config;
use crate::embedding::embed_query;
use crate::error::{RagError, RagResult};
use crate::generation::build_prompt;
use crate::models::QueryResult;
use crate::services::Services;

pub struct QueryPipeline {
    services: Services,
}

impl QueryPipeline {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// Answer `query_text` from the indexed documents. `k` overrides the
    /// configured number of vector neighbours.
    pub async fn query(&self, query_text: &str, k: Option<usize>) -> RagResult<QueryResult> {
        if query_text.trim().is_empty() {
            return Err(RagError::InvalidInput("query is empty".to_string()));
        }
        let settings = &self.services.settings;
        let k = k.unwrap_or(settings.k);
        if k == 0 {
            return Err(RagError::InvalidInput("k must be >= 1".to_string()));
        }

        if let Some(cached) = self.services.cache.get(query_text).await? {
            tracing::info!(query = query_text, "cache hit");
            return Ok(cached);
        }
        tracing::info!(query = query_text, "cache miss");

        let query_vec = embed_query(self.services.embedder.as_ref(), query_text).await?;
        let matches = self.services.vectors.search_async(query_vec, k).await?;
        tracing::debug!(
            hits = matches.positions.len(),
            positions = ?matches.positions,
            "vector search"
        );

        let hits = self
            .services
            .lexical
            .search(query_text, &matches.positions, settings.lexical_limit)
            .await?;
        tracing::info!(hits = hits.len(), "lexical search");

        if hits.is_empty() {
            return Ok(QueryResult::no_results());
        }

        let context = hits
            .iter()
            .take(settings.context_docs)
            .map(|h| h.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = build_prompt(query_text, &context);

        let started = Instant::now();
        let answer = self.services.generator.generate(&prompt).await;
        tracing::info!(
            model = self.services.generator.model_name(),
            latency_ms = started.elapsed().as_millis() as u64,
            ok = answer.is_ok(),
            "generation call"
        );

        let answer = answer?.ok_or_else(|| {
            RagError::ModelUnavailable(
                "generation response did not contain an answer".to_string(),
            )
        })?;

        let result = QueryResult::single(answer.trim());
        self.services.cache.set(query_text, &result).await?;
        Ok(result)
    }
}

/// CLI entry: answer one query and print the results.
pub async fn run_query(config: &Config, query_text: &str, k: Option<usize>) -> Result<()> {
    let services = Services::from_config(config).await?;
    let result = services.query().query(query_text, k).await?;
    for answer in &result.results {
        println!("{}", answer);
    }
    Ok(())
}
