//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the only storage surface the pipeline
//! needs: upsert an [`IndexEntry`], query by vector, and prune entries of a
//! re-indexed source. Backends must be `Send + Sync` so a single
//! `Arc<dyn VectorIndex>` can serve concurrent requests.
//!
//! [`memory::InMemoryIndex`] is the reference implementation; the SQLite
//! backend lives in the `docrag` app crate.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{ChunkMetadata, IndexEntry, RetrievalResult};

/// Metadata restrictions applied to a query. Empty = no restriction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFilter {
    /// Only sources whose id starts with this prefix (e.g. `"docs/api/"`).
    #[serde(default)]
    pub source_prefix: Option<String>,
    /// Only these exact source ids.
    #[serde(default)]
    pub source_ids: Option<Vec<String>>,
    /// Require (`true`) or forbid (`false`) chunks holding a code block.
    #[serde(default)]
    pub has_code_block: Option<bool>,
    /// Only chunks whose document has this category.
    #[serde(default)]
    pub category: Option<String>,
}

impl MetadataFilter {
    pub fn is_empty(&self) -> bool {
        self.source_prefix.is_none()
            && self.source_ids.is_none()
            && self.has_code_block.is_none()
            && self.category.is_none()
    }

    pub fn matches(&self, meta: &ChunkMetadata) -> bool {
        if let Some(prefix) = &self.source_prefix {
            if !meta.source_id.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(ids) = &self.source_ids {
            if !ids.iter().any(|id| id == &meta.source_id) {
                return false;
            }
        }
        if let Some(code) = self.has_code_block {
            if meta.has_code_block != code {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if meta.category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Abstract vector index.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorIndex::upsert) | Insert or replace an entry by chunk id |
/// | [`query`](VectorIndex::query) | Top-`k` entries by cosine similarity |
/// | [`delete_stale`](VectorIndex::delete_stale) | Drop ordinals past the end of a re-indexed source |
/// | [`delete_source`](VectorIndex::delete_source) | Drop every entry of a source |
/// | [`count`](VectorIndex::count) | Number of stored entries |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Dimensionality every stored and query vector must have.
    fn dims(&self) -> usize;

    /// Insert or replace the entry with the same chunk id.
    ///
    /// Fails if the vector length differs from [`dims`](VectorIndex::dims).
    async fn upsert(&self, entry: &IndexEntry) -> Result<()>;

    /// Up to `k` entries matching `filter`, best first, ranked from 0.
    ///
    /// Equal scores are ordered by chunk id ascending.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<RetrievalResult>>;

    /// Delete entries of `source_id` whose ordinal is `>= keep`.
    ///
    /// Returns the number of entries removed.
    async fn delete_stale(&self, source_id: &str, keep: usize) -> Result<u64>;

    /// Delete every entry of `source_id`. Returns the number removed.
    async fn delete_source(&self, source_id: &str) -> Result<u64>;

    async fn count(&self) -> Result<usize>;
}

/// Sort scored results best-first with a deterministic tie-break, keep the
/// top `k` and assign ranks.
pub fn rank_results(mut results: Vec<RetrievalResult>, k: usize) -> Vec<RetrievalResult> {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    results.truncate(k);
    for (rank, r) in results.iter_mut().enumerate() {
        r.rank = rank;
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(source: &str, code: bool) -> ChunkMetadata {
        ChunkMetadata {
            source_id: source.to_string(),
            chunk_ordinal: 0,
            heading_path: vec![],
            has_code_block: code,
            code_languages: vec![],
            symbols: vec![],
            span_start: 0,
            span_end: 1,
            category: None,
        }
    }

    #[test]
    fn test_empty_filter_matches_all() {
        let f = MetadataFilter::default();
        assert!(f.is_empty());
        assert!(f.matches(&meta("anything", true)));
    }

    #[test]
    fn test_filter_prefix_ids_code() {
        let f = MetadataFilter {
            source_prefix: Some("docs/".into()),
            ..Default::default()
        };
        assert!(f.matches(&meta("docs/a.md", false)));
        assert!(!f.matches(&meta("blog/a.md", false)));

        let f = MetadataFilter {
            source_ids: Some(vec!["x.md".into()]),
            has_code_block: Some(true),
            ..Default::default()
        };
        assert!(f.matches(&meta("x.md", true)));
        assert!(!f.matches(&meta("x.md", false)));
        assert!(!f.matches(&meta("y.md", true)));
    }

    #[test]
    fn test_filter_category() {
        let f = MetadataFilter {
            category: Some("retrieval".into()),
            ..Default::default()
        };
        assert!(!f.is_empty());
        let mut tagged = meta("https://docs.example.com/retrieval/vectorstores", false);
        assert!(!f.matches(&tagged));
        tagged.category = Some("retrieval".into());
        assert!(f.matches(&tagged));
        tagged.category = Some("agents".into());
        assert!(!f.matches(&tagged));
    }
}
