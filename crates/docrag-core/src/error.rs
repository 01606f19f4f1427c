//! Error taxonomy for the generation pipeline.
//!
//! Adapters report failures as `anyhow::Error`; the chain classifies each
//! one into a [`RagError`] so callers can branch on [`ErrorKind`] without
//! string matching. Data-quality problems found while chunking are not
//! errors at all: they are returned as [`DataQualityWarning`]s next to the
//! chunks.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Discriminant carried by terminal `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EmbeddingFailure,
    IndexUnavailable,
    GenerationFailure,
    Timeout,
    InvalidRequest,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::EmbeddingFailure => "embedding_failure",
            ErrorKind::IndexUnavailable => "index_unavailable",
            ErrorKind::GenerationFailure => "generation_failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InvalidRequest => "invalid_request",
        };
        f.write_str(s)
    }
}

/// The external call that was in flight when a timeout fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Embed,
    Retrieve,
    ModelToken,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Embed => f.write_str("embedding call"),
            Stage::Retrieve => f.write_str("retrieval call"),
            Stage::ModelToken => f.write_str("model token fetch"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),

    #[error("vector index unavailable: {0:#}")]
    IndexUnavailable(anyhow::Error),

    #[error("generation failed: {0:#}")]
    Generation(anyhow::Error),

    #[error("{stage} exceeded {}ms", .limit.as_millis())]
    Timeout { stage: Stage, limit: Duration },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RagError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RagError::Embedding(_) => ErrorKind::EmbeddingFailure,
            RagError::IndexUnavailable(_) => ErrorKind::IndexUnavailable,
            RagError::Generation(_) => ErrorKind::GenerationFailure,
            RagError::Timeout { .. } => ErrorKind::Timeout,
            RagError::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }
}

/// A non-fatal problem found in source data.
///
/// Produced by the chunker (e.g. an unterminated code fence); the caller
/// logs it and ingestion carries on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataQualityWarning {
    pub source_id: String,
    /// Byte offset in the document where the problem starts.
    pub offset: usize,
    pub message: String,
}

impl fmt::Display for DataQualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @{}: {}", self.source_id, self.offset, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            RagError::Embedding(anyhow::anyhow!("x")).kind(),
            ErrorKind::EmbeddingFailure
        );
        assert_eq!(
            RagError::Timeout {
                stage: Stage::Retrieve,
                limit: Duration::from_millis(5)
            }
            .kind(),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn test_timeout_message() {
        let err = RagError::Timeout {
            stage: Stage::ModelToken,
            limit: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "model token fetch exceeded 250ms");
    }
}
