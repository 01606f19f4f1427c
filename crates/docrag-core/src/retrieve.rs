//! Retriever: index query plus thresholding, filtering and de-duplication.
//!
//! The index is over-fetched by `overfetch_factor` so that results removed
//! by filtering, the score threshold or span de-duplication still leave up
//! to `k` survivors. The retriever never retries; an index failure is
//! reported as [`RagError::IndexUnavailable`].

use std::sync::Arc;

use crate::error::RagError;
use crate::models::RetrievalResult;
use crate::store::{rank_results, MetadataFilter, VectorIndex};

pub const DEFAULT_OVERFETCH: usize = 3;

pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    overfetch_factor: usize,
}

impl Retriever {
    pub fn new(index: Arc<dyn VectorIndex>) -> Self {
        Self {
            index,
            overfetch_factor: DEFAULT_OVERFETCH,
        }
    }

    /// Override the over-fetch factor (values below 1 are treated as 1).
    pub fn with_overfetch(mut self, factor: usize) -> Self {
        self.overfetch_factor = factor.max(1);
        self
    }

    /// Up to `k` results scoring at least `score_threshold`, best first.
    ///
    /// An empty result is not an error.
    pub async fn retrieve(
        &self,
        query_vector: &[f32],
        k: usize,
        score_threshold: f32,
        filters: &MetadataFilter,
    ) -> Result<Vec<RetrievalResult>, RagError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let dims = self.index.dims();
        if query_vector.len() != dims {
            return Err(RagError::InvalidRequest(format!(
                "query vector has {} dimensions, index expects {}",
                query_vector.len(),
                dims
            )));
        }

        let fetch = k.saturating_mul(self.overfetch_factor);
        let candidates = self
            .index
            .query(query_vector, fetch, filters)
            .await
            .map_err(RagError::IndexUnavailable)?;
        let fetched = candidates.len();

        let passing: Vec<RetrievalResult> = candidates
            .into_iter()
            .filter(|r| filters.matches(&r.chunk.metadata))
            .filter(|r| r.score >= score_threshold)
            .collect();
        let passing = rank_results(passing, usize::MAX);

        let mut kept: Vec<RetrievalResult> = Vec::with_capacity(k);
        for candidate in passing {
            if kept.len() == k {
                break;
            }
            let duplicate = kept.iter().any(|r| {
                r.chunk.id == candidate.chunk.id
                    || r.chunk.metadata.overlaps(&candidate.chunk.metadata)
            });
            if !duplicate {
                kept.push(candidate);
            }
        }

        let results = rank_results(kept, k);
        tracing::debug!(
            fetched,
            returned = results.len(),
            k,
            threshold = score_threshold,
            "retrieval complete"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::{Chunk, ChunkMetadata, IndexEntry};
    use anyhow::{bail, Result};
    use async_trait::async_trait;

    struct FixedIndex {
        results: Vec<RetrievalResult>,
    }

    #[async_trait]
    impl VectorIndex for FixedIndex {
        fn dims(&self) -> usize {
            2
        }
        async fn upsert(&self, _entry: &IndexEntry) -> Result<()> {
            Ok(())
        }
        async fn query(
            &self,
            _vector: &[f32],
            k: usize,
            _filter: &MetadataFilter,
        ) -> Result<Vec<RetrievalResult>> {
            Ok(self.results.iter().take(k).cloned().collect())
        }
        async fn delete_stale(&self, _source_id: &str, _keep: usize) -> Result<u64> {
            Ok(0)
        }
        async fn delete_source(&self, _source_id: &str) -> Result<u64> {
            Ok(0)
        }
        async fn count(&self) -> Result<usize> {
            Ok(self.results.len())
        }
    }

    struct DownIndex;

    #[async_trait]
    impl VectorIndex for DownIndex {
        fn dims(&self) -> usize {
            2
        }
        async fn upsert(&self, _entry: &IndexEntry) -> Result<()> {
            bail!("connection refused")
        }
        async fn query(
            &self,
            _vector: &[f32],
            _k: usize,
            _filter: &MetadataFilter,
        ) -> Result<Vec<RetrievalResult>> {
            bail!("connection refused")
        }
        async fn delete_stale(&self, _source_id: &str, _keep: usize) -> Result<u64> {
            bail!("connection refused")
        }
        async fn delete_source(&self, _source_id: &str) -> Result<u64> {
            bail!("connection refused")
        }
        async fn count(&self) -> Result<usize> {
            bail!("connection refused")
        }
    }

    fn result(source: &str, span: (usize, usize), score: f32) -> RetrievalResult {
        RetrievalResult {
            chunk: Chunk {
                id: format!("{}-{}", source, span.0),
                text: format!("text of {} at {}", source, span.0),
                hash: String::new(),
                metadata: ChunkMetadata {
                    source_id: source.to_string(),
                    chunk_ordinal: 0,
                    heading_path: vec![],
                    has_code_block: false,
                    code_languages: vec![],
                    symbols: vec![],
                    span_start: span.0,
                    span_end: span.1,
                    category: None,
                },
            },
            score,
            rank: 0,
        }
    }

    fn five_candidates() -> Vec<RetrievalResult> {
        vec![
            result("a", (0, 10), 0.95),
            result("b", (0, 10), 0.85),
            result("c", (0, 10), 0.75),
            result("d", (0, 10), 0.6),
            result("e", (0, 10), 0.5),
        ]
    }

    #[tokio::test]
    async fn test_threshold_keeps_two_of_five() {
        let retriever = Retriever::new(Arc::new(FixedIndex {
            results: five_candidates(),
        }));
        let results = retriever
            .retrieve(&[1.0, 0.0], 3, 0.8, &MetadataFilter::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.metadata.source_id, "a");
        assert_eq!(results[1].chunk.metadata.source_id, "b");
        assert!(results[0].score > results[1].score);
        assert_eq!(results[0].rank, 0);
        assert_eq!(results[1].rank, 1);
    }

    #[tokio::test]
    async fn test_threshold_monotonic() {
        let retriever = Retriever::new(Arc::new(FixedIndex {
            results: five_candidates(),
        }));
        let mut previous: Option<Vec<String>> = None;
        for threshold in [0.0, 0.55, 0.7, 0.8, 0.9, 0.99] {
            let ids: Vec<String> = retriever
                .retrieve(&[1.0, 0.0], 5, threshold, &MetadataFilter::default())
                .await
                .unwrap()
                .into_iter()
                .map(|r| r.chunk.id)
                .collect();
            if let Some(prev) = &previous {
                assert!(ids.iter().all(|id| prev.contains(id)));
            }
            previous = Some(ids);
        }
    }

    #[tokio::test]
    async fn test_overlapping_spans_deduplicated() {
        let retriever = Retriever::new(Arc::new(FixedIndex {
            results: vec![
                result("a", (0, 100), 0.9),
                result("a", (80, 180), 0.8),
                result("a", (200, 300), 0.7),
            ],
        }));
        let results = retriever
            .retrieve(&[1.0, 0.0], 3, 0.0, &MetadataFilter::default())
            .await
            .unwrap();
        let spans: Vec<usize> = results
            .iter()
            .map(|r| r.chunk.metadata.span_start)
            .collect();
        assert_eq!(spans, vec![0, 200]);
    }

    #[tokio::test]
    async fn test_filters_applied() {
        let retriever = Retriever::new(Arc::new(FixedIndex {
            results: five_candidates(),
        }));
        let filter = MetadataFilter {
            source_ids: Some(vec!["c".into(), "e".into()]),
            ..Default::default()
        };
        let results = retriever
            .retrieve(&[1.0, 0.0], 3, 0.0, &filter)
            .await
            .unwrap();
        let sources: Vec<&str> = results
            .iter()
            .map(|r| r.chunk.metadata.source_id.as_str())
            .collect();
        assert_eq!(sources, vec!["c", "e"]);
    }

    #[tokio::test]
    async fn test_empty_is_ok() {
        let retriever = Retriever::new(Arc::new(FixedIndex { results: vec![] }));
        let results = retriever
            .retrieve(&[1.0, 0.0], 3, 0.5, &MetadataFilter::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_index_unavailable() {
        let retriever = Retriever::new(Arc::new(DownIndex));
        let err = retriever
            .retrieve(&[1.0, 0.0], 3, 0.5, &MetadataFilter::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexUnavailable);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_invalid_request() {
        let retriever = Retriever::new(Arc::new(FixedIndex { results: vec![] }));
        let err = retriever
            .retrieve(&[1.0, 0.0, 0.0], 3, 0.5, &MetadataFilter::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }
}
