//! Core data types that flow through ingestion and generation.
//!
//! A [`Document`] is split into [`Chunk`]s by [`crate::chunk`], each chunk is
//! embedded and stored as an [`IndexEntry`], and queries come back as ranked
//! [`RetrievalResult`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A raw source document, as fetched by the ingestion tooling.
#[derive(Debug, Clone)]
pub struct Document {
    /// Stable identifier (source URL or path relative to the corpus root).
    pub source_id: String,
    pub title: Option<String>,
    pub source_url: Option<String>,
    /// Coarse topic, e.g. `"retrieval"`, set by the web source.
    pub category: Option<String>,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

impl Document {
    pub fn new(source_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            title: None,
            source_url: None,
            category: None,
            body: body.into(),
            fetched_at: Utc::now(),
        }
    }
}

/// Per-chunk metadata persisted next to the vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_id: String,
    /// Position of the chunk within its document, starting at 0.
    pub chunk_ordinal: i64,
    /// Markdown headings in effect where the chunk starts, outermost first.
    pub heading_path: Vec<String>,
    /// True if the chunk holds at least one fenced code block.
    pub has_code_block: bool,
    /// Info-string languages of the code blocks in the chunk (`"plain"` when absent).
    #[serde(default)]
    pub code_languages: Vec<String>,
    /// `def` / `class` names found in Python code blocks.
    #[serde(default)]
    pub symbols: Vec<String>,
    /// Byte offset of the chunk's first character in the document body.
    pub span_start: usize,
    /// Byte offset one past the chunk's last character.
    pub span_end: usize,
    /// Category of the owning document, if it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl ChunkMetadata {
    /// Heading path rendered as `"Install > Linux"`, or `""` at top level.
    pub fn heading_display(&self) -> String {
        self.heading_path.join(" > ")
    }

    /// Whether two chunks of the same source cover overlapping text.
    pub fn overlaps(&self, other: &ChunkMetadata) -> bool {
        self.source_id == other.source_id
            && self.span_start < other.span_end
            && other.span_start < self.span_end
    }
}

/// A contiguous span of a document's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Deterministic id derived from `source_id` and the ordinal.
    pub id: String,
    pub text: String,
    /// SHA-256 of `text`, for staleness detection on re-index.
    pub hash: String,
    pub metadata: ChunkMetadata,
}

/// A chunk together with its embedding, as stored in a vector index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A scored chunk returned by the index or the retriever.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    /// Cosine similarity; higher is more relevant.
    pub score: f32,
    /// 0 = most relevant.
    pub rank: usize,
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One prior turn of the conversation, oldest first in a history slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub text: String,
}

impl HistoryTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(source: &str, start: usize, end: usize) -> ChunkMetadata {
        ChunkMetadata {
            source_id: source.to_string(),
            chunk_ordinal: 0,
            heading_path: vec![],
            has_code_block: false,
            code_languages: vec![],
            symbols: vec![],
            span_start: start,
            span_end: end,
            category: None,
        }
    }

    #[test]
    fn test_overlap_same_source() {
        assert!(meta("a", 0, 10).overlaps(&meta("a", 8, 20)));
        assert!(!meta("a", 0, 10).overlaps(&meta("a", 10, 20)));
    }

    #[test]
    fn test_overlap_different_source() {
        assert!(!meta("a", 0, 10).overlaps(&meta("b", 0, 10)));
    }

    #[test]
    fn test_heading_display() {
        let mut m = meta("a", 0, 1);
        m.heading_path = vec!["Install".into(), "Linux".into()];
        assert_eq!(m.heading_display(), "Install > Linux");
    }
}
