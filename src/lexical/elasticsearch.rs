//! Lexical backend on an Elasticsearch cluster, spoken to over its REST API.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::time::Duration;

use super::{BackendError, LexicalBackend};
use crate::models::{LexicalDocument, LexicalHit};

pub struct ElasticsearchBackend {
    base: Url,
    index: String,
    client: reqwest::Client,
}

impl ElasticsearchBackend {
    pub fn new(url: &str, index: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base = Url::parse(url)
            .map_err(|e| anyhow::anyhow!("Invalid lexical.url '{}': {}", url, e))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("Invalid lexical.url '{}': not a base URL", url);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base,
            index: index.to_string(),
            client,
        })
    }

    /// `{base}/{index}/{segments...}` with every segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| BackendError::Failed("lexical.url cannot take a path".into()))?;
            path.pop_if_empty().push(&self.index);
            for s in segments {
                path.push(s);
            }
        }
        Ok(url)
    }
}

fn map_err(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout(e.to_string())
    } else {
        BackendError::Failed(e.to_string())
    }
}

async fn error_body(response: reqwest::Response) -> BackendError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        BackendError::Timeout(format!("Elasticsearch {}: {}", status, body))
    } else {
        BackendError::Failed(format!("Elasticsearch {}: {}", status, body))
    }
}

fn index_mapping() -> serde_json::Value {
    serde_json::json!({
        "mappings": {
            "properties": {
                "content": { "type": "text" },
                "metadata": { "type": "object", "enabled": true },
                "embedding_id": { "type": "integer" }
            }
        }
    })
}

/// `bool.should` of an exact `terms` clause on `embedding_id` and a `match`
/// clause on `content`; at least one must hold. The query text goes to the
/// index analyzer untouched.
pub(crate) fn build_search_body(
    query_text: &str,
    positions: &[u64],
    limit: usize,
) -> serde_json::Value {
    serde_json::json!({
        "size": limit,
        "query": {
            "bool": {
                "should": [
                    { "terms": { "embedding_id": positions } },
                    { "match": { "content": query_text } }
                ],
                "minimum_should_match": 1
            }
        }
    })
}

pub(crate) fn parse_hits(json: &serde_json::Value) -> Result<Vec<LexicalHit>, BackendError> {
    let hits = json
        .pointer("/hits/hits")
        .and_then(|h| h.as_array())
        .ok_or_else(|| BackendError::Failed("search response missing hits.hits".into()))?;

    let mut result = Vec::with_capacity(hits.len());
    for hit in hits {
        let source = hit
            .get("_source")
            .ok_or_else(|| BackendError::Failed("search hit missing _source".into()))?;
        let Some(content) = source.get("content").and_then(|c| c.as_str()) else {
            continue;
        };
        result.push(LexicalHit {
            content: content.to_string(),
            metadata: source
                .get("metadata")
                .cloned()
                .unwrap_or(serde_json::json!({})),
            embedding_id: source
                .get("embedding_id")
                .and_then(|v| v.as_u64())
                .unwrap_or_default(),
            score: hit.get("_score").and_then(|s| s.as_f64()).unwrap_or(0.0),
        });
    }
    Ok(result)
}

#[async_trait]
impl LexicalBackend for ElasticsearchBackend {
    fn name(&self) -> &str {
        "elasticsearch"
    }

    async fn ensure_index(&self) -> Result<(), BackendError> {
        let url = self.url(&[])?;
        let response = self.client.head(url.clone()).send().await.map_err(map_err)?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(error_body(response).await);
        }

        let response = self
            .client
            .put(url)
            .json(&index_mapping())
            .send()
            .await
            .map_err(map_err)?;
        if response.status().is_success() {
            tracing::info!(index = %self.index, "created lexical index");
            return Ok(());
        }

        // Lost a race with another process creating the same index
        let err = error_body(response).await;
        if err.to_string().contains("resource_already_exists_exception") {
            return Ok(());
        }
        Err(err)
    }

    async fn upsert(&self, doc: &LexicalDocument) -> Result<(), BackendError> {
        let url = self.url(&["_doc", &doc.id])?;
        let body = serde_json::json!({
            "content": doc.content,
            "metadata": doc.metadata,
            "embedding_id": doc.embedding_id,
        });
        let response = self
            .client
            .put(url)
            .json(&body)
            .send()
            .await
            .map_err(map_err)?;
        if !response.status().is_success() {
            return Err(error_body(response).await);
        }
        Ok(())
    }

    async fn search(
        &self,
        query_text: &str,
        positions: &[u64],
        limit: usize,
    ) -> Result<Vec<LexicalHit>, BackendError> {
        let url = self.url(&["_search"])?;
        let response = self
            .client
            .post(url)
            .json(&build_search_body(query_text, positions, limit))
            .send()
            .await
            .map_err(map_err)?;
        if !response.status().is_success() {
            return Err(error_body(response).await);
        }
        let json: serde_json::Value = response.json().await.map_err(map_err)?;
        parse_hits(&json)
    }

    async fn get(&self, id: &str) -> Result<Option<LexicalDocument>, BackendError> {
        let url = self.url(&["_doc", id])?;
        let response = self.client.get(url).send().await.map_err(map_err)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_body(response).await);
        }

        let json: serde_json::Value = response.json().await.map_err(map_err)?;
        let Some(source) = json.get("_source") else {
            return Ok(None);
        };
        Ok(Some(LexicalDocument {
            id: id.to_string(),
            content: source
                .get("content")
                .and_then(|c| c.as_str())
                .unwrap_or_default()
                .to_string(),
            metadata: source
                .get("metadata")
                .cloned()
                .unwrap_or(serde_json::json!({})),
            embedding_id: source
                .get("embedding_id")
                .and_then(|v| v.as_u64())
                .unwrap_or_default(),
        }))
    }

    async fn delete(&self, id: &str) -> Result<bool, BackendError> {
        let url = self.url(&["_doc", id])?;
        let response = self.client.delete(url).send().await.map_err(map_err)?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            _ => Err(error_body(response).await),
        }
    }
}
