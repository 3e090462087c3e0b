//! Error taxonomy shared by the ingestion and query pipelines.
//!
//! Every pipeline stage returns [`RagError`]. The HTTP layer maps each
//! variant to a status code; the CLI prints the message. An empty index is
//! deliberately absent from this list: searching an empty index yields an
//! empty result.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// Malformed or undecodable content, empty names, empty queries.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Upload whose type is not plain text, PDF, or HTML.
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// Extraction produced no chunks.
    #[error("document '{0}' contains no extractable text")]
    EmptyDocument(String),

    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    /// Embedding or generation backend unreachable, erroring, or returning
    /// a response without the expected shape.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Vector or lexical write failure (after retries where they apply).
    #[error("index write failed: {0}")]
    IndexWrite(String),

    /// Vector or lexical read failure.
    #[error("index read failed: {0}")]
    IndexRead(String),

    #[error("cache error: {0}")]
    Cache(String),

    /// The chunk link ledger could not be read or written.
    #[error("ledger error: {0}")]
    Ledger(String),
}

pub type RagResult<T> = Result<T, RagError>;

impl RagError {
    /// Short machine-readable name, used in structured log events.
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::InvalidInput(_) => "invalid_input",
            RagError::UnsupportedFileType(_) => "unsupported_file_type",
            RagError::EmptyDocument(_) => "empty_document",
            RagError::PayloadTooLarge { .. } => "payload_too_large",
            RagError::ModelUnavailable(_) => "model_unavailable",
            RagError::IndexWrite(_) => "index_write",
            RagError::IndexRead(_) => "index_read",
            RagError::Cache(_) => "cache",
            RagError::Ledger(_) => "ledger",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = RagError::UnsupportedFileType("exe".to_string());
        assert_eq!(err.to_string(), "unsupported file type: exe");

        let err = RagError::PayloadTooLarge { size: 20, max: 10 };
        assert_eq!(err.to_string(), "payload of 20 bytes exceeds the 10 byte limit");
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(RagError::EmptyDocument("a".into()).kind(), "empty_document");
        assert_eq!(RagError::IndexWrite("x".into()).kind(), "index_write");
    }
}
