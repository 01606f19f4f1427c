//! In-memory [`VectorIndex`] implementation for tests and embedding hosts
//! that do not want a database.
//!
//! Entries live in a `HashMap` behind `std::sync::RwLock`. Queries are
//! brute-force cosine similarity over every stored vector.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{IndexEntry, RetrievalResult};

use super::{rank_results, MetadataFilter, VectorIndex};

/// In-memory vector index with a fixed dimensionality.
pub struct InMemoryIndex {
    dims: usize,
    entries: RwLock<HashMap<String, IndexEntry>>,
}

impl InMemoryIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, IndexEntry>>> {
        self.entries
            .read()
            .map_err(|_| anyhow!("in-memory index lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, IndexEntry>>> {
        self.entries
            .write()
            .map_err(|_| anyhow!("in-memory index lock poisoned"))
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn upsert(&self, entry: &IndexEntry) -> Result<()> {
        if entry.vector.len() != self.dims {
            bail!(
                "vector has {} dimensions, index expects {}",
                entry.vector.len(),
                self.dims
            );
        }
        self.write()?.insert(entry.chunk.id.clone(), entry.clone());
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<RetrievalResult>> {
        if vector.len() != self.dims {
            bail!(
                "query vector has {} dimensions, index expects {}",
                vector.len(),
                self.dims
            );
        }
        let entries = self.read()?;
        let scored: Vec<RetrievalResult> = entries
            .values()
            .filter(|e| filter.matches(&e.chunk.metadata))
            .map(|e| RetrievalResult {
                chunk: e.chunk.clone(),
                score: cosine_similarity(vector, &e.vector),
                rank: 0,
            })
            .collect();
        Ok(rank_results(scored, k))
    }

    async fn delete_stale(&self, source_id: &str, keep: usize) -> Result<u64> {
        let mut entries = self.write()?;
        let before = entries.len();
        entries.retain(|_, e| {
            e.chunk.metadata.source_id != source_id || (e.chunk.metadata.chunk_ordinal as usize) < keep
        });
        Ok((before - entries.len()) as u64)
    }

    async fn delete_source(&self, source_id: &str) -> Result<u64> {
        self.delete_stale(source_id, 0).await
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }
}
