//! Generative model backend.
//!
//! One non-streaming completion per query. A backend that answers but
//! leaves out the answer field reports `Ok(None)`; the query pipeline
//! decides what that means.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::Config;
use crate::error::{RagError, RagResult};

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;
    /// `Ok(None)` when the response carried no textual answer.
    async fn generate(&self, prompt: &str) -> RagResult<Option<String>>;
}

/// Prompt that confines the model to the retrieved context.
pub fn build_prompt(query: &str, context: &str) -> String {
    format!(
        "Based on the following retrieved information:\n{}\n\n\
         Only use this context to answer the question: {}\n\
         If the context does not answer the question, say \
         \"I don't know based on the given information.\"",
        context, query
    )
}

/// Generator backed by Ollama's `POST /api/generate`.
pub struct OllamaGenerator {
    url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.generation.timeout_secs))
            .build()?;
        Ok(Self {
            url: config.generation.url.trim_end_matches('/').to_string(),
            model: config.generation.model.clone(),
            client,
        })
    }
}

/// The `response` field of an Ollama generate reply, if it is a string.
fn parse_generate_response(json: &serde_json::Value) -> Option<String> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(|s| s.to_string())
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> RagResult<Option<String>> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                RagError::ModelUnavailable(format!(
                    "generation backend unreachable at {}: {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RagError::ModelUnavailable(format!(
                "generation backend error {}: {}",
                status, text
            )));
        }

        let json: serde_json::Value = response.json().await.map_err(|e| {
            RagError::ModelUnavailable(format!("invalid generation response: {}", e))
        })?;
        Ok(parse_generate_response(&json))
    }
}
