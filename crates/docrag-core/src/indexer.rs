//! Document indexing: chunk, embed, upsert, prune.
//!
//! Indexing is idempotent: chunk ids are deterministic, so re-indexing an
//! unchanged document overwrites the same entries, and entries whose
//! ordinal no longer exists are deleted.

use anyhow::{Context, Result};

use crate::chunk::{chunk_document, ChunkParams};
use crate::embedding::Embedder;
use crate::error::DataQualityWarning;
use crate::models::{Chunk, Document, IndexEntry};
use crate::store::VectorIndex;

#[derive(Debug, Clone)]
pub struct IndexReport {
    pub chunks: Vec<Chunk>,
    pub warnings: Vec<DataQualityWarning>,
    /// Entries of this source removed because the document shrank.
    pub removed: u64,
}

/// Chunk `doc`, embed every chunk and upsert it, then drop stale ordinals.
///
/// The first embedding or index failure aborts the document; entries already
/// written stay and are overwritten by the next successful run.
pub async fn index_document(
    doc: &Document,
    params: &ChunkParams,
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
) -> Result<IndexReport> {
    let output = chunk_document(doc, params);

    for chunk in &output.chunks {
        let vector = embedder
            .embed(&chunk.text)
            .await
            .with_context(|| format!("embedding chunk {} of {}", chunk.metadata.chunk_ordinal, doc.source_id))?;
        index
            .upsert(&IndexEntry {
                chunk: chunk.clone(),
                vector,
            })
            .await
            .with_context(|| format!("storing chunk {} of {}", chunk.metadata.chunk_ordinal, doc.source_id))?;
    }

    let removed = index
        .delete_stale(&doc.source_id, output.chunks.len())
        .await
        .with_context(|| format!("pruning stale chunks of {}", doc.source_id))?;

    tracing::debug!(
        source_id = %doc.source_id,
        chunks = output.chunks.len(),
        removed,
        "indexed document"
    );

    Ok(IndexReport {
        chunks: output.chunks,
        warnings: output.warnings,
        removed,
    })
}
