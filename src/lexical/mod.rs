//! Lexical (full-text) index gateway.
//!
//! The gateway owns the write retry policy and the error mapping; the text
//! engine itself sits behind [`LexicalBackend`]:
//!
//! | `[lexical].backend` | Implementation |
//! |---------------------|----------------|
//! | `"elasticsearch"` | [`ElasticsearchBackend`] over HTTP |
//! | `"sqlite"` | [`SqliteBackend`], an FTS5 table in the service database |
//!
//! Every document carries `embedding_id`, the vector index position of the
//! same chunk. Search matches documents whose content matches the query
//! text OR whose `embedding_id` is among the supplied positions.

mod elasticsearch;
mod sqlite;

pub use elasticsearch::ElasticsearchBackend;
pub use sqlite::SqliteBackend;

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::time::Duration;

use crate::config::Config;
use crate::error::{RagError, RagResult};
use crate::models::{LexicalDocument, LexicalHit};

/// Failure reported by a backend. Only `Timeout` is retried, and only for
/// writes.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("{0}")]
    Failed(String),
}

/// Text-search engine contract.
#[async_trait]
pub trait LexicalBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Create the index with the `{content, metadata, embedding_id}`
    /// schema if it does not exist yet.
    async fn ensure_index(&self) -> Result<(), BackendError>;

    /// Insert or replace the document with `doc.id`.
    async fn upsert(&self, doc: &LexicalDocument) -> Result<(), BackendError>;

    /// Documents matching `query_text` on content OR with an `embedding_id`
    /// in `positions`, best first, at most `limit`.
    async fn search(
        &self,
        query_text: &str,
        positions: &[u64],
        limit: usize,
    ) -> Result<Vec<LexicalHit>, BackendError>;

    async fn get(&self, id: &str) -> Result<Option<LexicalDocument>, BackendError>;

    /// Returns `false` when no document had that id.
    async fn delete(&self, id: &str) -> Result<bool, BackendError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.lexical.max_attempts.max(1),
            backoff: Duration::from_millis(config.lexical.retry_backoff_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

pub struct LexicalIndexGateway {
    backend: Box<dyn LexicalBackend>,
    retry: RetryPolicy,
}

impl LexicalIndexGateway {
    pub fn new(backend: Box<dyn LexicalBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Idempotent schema creation.
    pub async fn ensure_index(&self) -> RagResult<()> {
        self.backend.ensure_index().await.map_err(|e| {
            RagError::IndexWrite(format!("{}: ensure index: {}", self.backend.name(), e))
        })
    }

    /// Upsert one document. Timeouts are retried with a fixed backoff up to
    /// the attempt limit; any other failure is returned immediately.
    pub async fn index_document(
        &self,
        id: &str,
        content: &str,
        metadata: serde_json::Value,
        embedding_id: u64,
    ) -> RagResult<()> {
        let doc = LexicalDocument {
            id: id.to_string(),
            content: content.to_string(),
            metadata,
            embedding_id,
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.backend.upsert(&doc).await {
                Ok(()) => {
                    tracing::debug!(doc_id = id, embedding_id, attempt, "lexical document indexed");
                    return Ok(());
                }
                Err(BackendError::Timeout(msg)) if attempt < self.retry.max_attempts => {
                    tracing::warn!(
                        doc_id = id,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %msg,
                        "lexical write timed out, retrying"
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                }
                Err(e) => {
                    tracing::error!(doc_id = id, attempt, error = %e, "lexical write failed");
                    return Err(RagError::IndexWrite(format!(
                        "{}: document {} after {} attempt(s): {}",
                        self.backend.name(),
                        id,
                        attempt,
                        e
                    )));
                }
            }
        }
    }

    /// OR-match search. `positions` is treated as a set.
    pub async fn search(
        &self,
        query_text: &str,
        positions: &[u64],
        limit: usize,
    ) -> RagResult<Vec<LexicalHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut positions = positions.to_vec();
        positions.sort_unstable();
        positions.dedup();

        self.backend
            .search(query_text, &positions, limit)
            .await
            .map_err(|e| RagError::IndexRead(format!("{}: search: {}", self.backend.name(), e)))
    }

    pub async fn get_by_id(&self, id: &str) -> RagResult<Option<LexicalDocument>> {
        self.backend
            .get(id)
            .await
            .map_err(|e| RagError::IndexRead(format!("{}: get {}: {}", self.backend.name(), id, e)))
    }

    pub async fn delete_by_id(&self, id: &str) -> RagResult<bool> {
        self.backend.delete(id).await.map_err(|e| {
            RagError::IndexWrite(format!("{}: delete {}: {}", self.backend.name(), id, e))
        })
    }
}

/// Build the gateway selected by `[lexical].backend`.
pub fn create_lexical(config: &Config, pool: &SqlitePool) -> anyhow::Result<LexicalIndexGateway> {
    let backend: Box<dyn LexicalBackend> = match config.lexical.backend.as_str() {
        "sqlite" => Box::new(SqliteBackend::new(pool.clone())),
        "elasticsearch" => Box::new(ElasticsearchBackend::new(
            &config.lexical.url,
            &config.lexical.index,
            Duration::from_secs(config.lexical.timeout_secs),
        )?),
        other => anyhow::bail!("Unknown lexical backend: {}", other),
    };
    Ok(LexicalIndexGateway::new(backend, RetryPolicy::from_config(config)))
}

/// Turn free text into an OR of its alphanumeric terms, so user input can
/// never be parsed as query syntax.
pub(crate) fn query_terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Backend that fails `upsert` with a scripted error sequence.
    struct ScriptedBackend {
        calls: Arc<AtomicU32>,
        timeouts_before_success: u32,
        hard_failure: bool,
    }

    #[async_trait]
    impl LexicalBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn ensure_index(&self) -> Result<(), BackendError> {
            Ok(())
        }
        async fn upsert(&self, _doc: &LexicalDocument) -> Result<(), BackendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.hard_failure {
                return Err(BackendError::Failed("mapping conflict".into()));
            }
            if n <= self.timeouts_before_success {
                return Err(BackendError::Timeout(format!("attempt {}", n)));
            }
            Ok(())
        }
        async fn search(
            &self,
            _query_text: &str,
            _positions: &[u64],
            _limit: usize,
        ) -> Result<Vec<LexicalHit>, BackendError> {
            Ok(Vec::new())
        }
        async fn get(&self, _id: &str) -> Result<Option<LexicalDocument>, BackendError> {
            Ok(None)
        }
        async fn delete(&self, _id: &str) -> Result<bool, BackendError> {
            Ok(false)
        }
    }

    fn gateway(timeouts: u32, hard_failure: bool) -> (LexicalIndexGateway, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let backend = ScriptedBackend {
            calls: calls.clone(),
            timeouts_before_success: timeouts,
            hard_failure,
        };
        let retry = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        };
        (LexicalIndexGateway::new(Box::new(backend), retry), calls)
    }

    #[tokio::test]
    async fn test_timeouts_are_retried_until_success() {
        let (gw, calls) = gateway(2, false);
        gw.index_document("a_0", "text", serde_json::json!({}), 0)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted_surface_index_write() {
        let (gw, calls) = gateway(10, false);
        let err = gw
            .index_document("a_0", "text", serde_json::json!({}), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::IndexWrite(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_failures_are_not_retried() {
        let (gw, calls) = gateway(0, true);
        let err = gw
            .index_document("a_0", "text", serde_json::json!({}), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::IndexWrite(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_query_terms_strip_syntax() {
        assert_eq!(
            query_terms("What is \"NEAR\"(rust, ownership)?"),
            vec!["what", "is", "near", "rust", "ownership"]
        );
        assert!(query_terms("?!  ..").is_empty());
    }
}
