//! Core data models that flow through ingestion and retrieval.

use serde::{Deserialize, Serialize};

/// Answer returned to callers when the lexical index finds nothing.
pub const NO_RESULTS_MESSAGE: &str = "No relevant information found.";

/// A contiguous span of sentences from one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position of the chunk within its document, starting at 0.
    pub ordinal: usize,
    pub text: String,
    /// Sum of the character lengths of the chunk's sentences.
    pub char_len: usize,
}

/// Record stored in the lexical index, one per ingested chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexicalDocument {
    pub id: String,
    pub content: String,
    pub metadata: serde_json::Value,
    /// Vector index position of the same chunk.
    pub embedding_id: u64,
}

/// Ranked lexical search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexicalHit {
    pub content: String,
    pub metadata: serde_json::Value,
    pub embedding_id: u64,
    pub score: f64,
}

/// Payload returned by the query pipeline and stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    pub results: Vec<String>,
}

impl QueryResult {
    pub fn single(answer: impl Into<String>) -> Self {
        Self {
            results: vec![answer.into()],
        }
    }

    pub fn no_results() -> Self {
        Self::single(NO_RESULTS_MESSAGE)
    }
}

/// Outcome of ingesting one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub document: String,
    pub indexed_chunk_count: usize,
    /// Vector positions assigned to the chunks, in chunk order.
    pub positions: Vec<u64>,
}

/// Lexical document id for chunk `ordinal` of `document_name`.
pub fn chunk_doc_id(document_name: &str, ordinal: usize) -> String {
    format!("{}_{}", document_name, ordinal)
}
