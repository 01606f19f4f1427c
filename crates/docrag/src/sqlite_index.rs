//! SQLite-backed [`VectorIndex`] implementation.
//!
//! Entries live in `index_entries` with the chunk text, its metadata as
//! JSON and the vector as a little-endian f32 BLOB. Queries are brute-force
//! cosine similarity over every candidate row, which is fine for the corpus
//! sizes a single documentation site produces.
//!
//! The index records its embedding model and dimensionality in
//! `index_meta` on first open; reopening with a different dimensionality
//! fails, so vectors of mixed sizes never share an index.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use docrag_core::embedding::{cosine_similarity, decode_vector, encode_vector};
use docrag_core::models::{Chunk, ChunkMetadata, Document, IndexEntry, RetrievalResult};
use docrag_core::store::{rank_results, MetadataFilter, VectorIndex};

/// Per-source row of the `documents` table.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub source_id: String,
    pub title: Option<String>,
    pub body_hash: String,
    pub chunk_count: i64,
    pub indexed_at: i64,
}

/// SQLite implementation of [`VectorIndex`], plus the document bookkeeping
/// ingestion needs to skip unchanged sources.
pub struct SqliteIndex {
    pool: SqlitePool,
    dims: usize,
}

impl SqliteIndex {
    /// Open the index for vectors of `dims` dimensions produced by `model`.
    ///
    /// Fails if the database already holds vectors of another dimensionality.
    pub async fn open(pool: SqlitePool, dims: usize, model: &str) -> Result<Self> {
        let stored: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'dims'")
                .fetch_optional(&pool)
                .await
                .context("reading index metadata (did you run `docrag init`?)")?;

        match stored {
            Some(value) => {
                let existing: usize = value
                    .parse()
                    .with_context(|| format!("corrupt index_meta dims value: {}", value))?;
                if existing != dims {
                    bail!(
                        "index holds {}-dimensional vectors but embedding.dims is {}; \
                         re-ingest with `docrag ingest --full` into a fresh database",
                        existing,
                        dims
                    );
                }
            }
            None => {
                sqlx::query("INSERT INTO index_meta (key, value) VALUES ('dims', ?), ('model', ?)")
                    .bind(dims.to_string())
                    .bind(model)
                    .execute(&pool)
                    .await?;
            }
        }

        Ok(Self { pool, dims })
    }

    /// Open an index that already holds vectors, taking its dimensionality
    /// from `index_meta`. Used by read-only commands that need no embedder.
    pub async fn open_existing(pool: SqlitePool) -> Result<Self> {
        let stored: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'dims'")
                .fetch_optional(&pool)
                .await
                .context("reading index metadata (did you run `docrag init`?)")?;
        let Some(value) = stored else {
            bail!("index is empty; run `docrag ingest` first");
        };
        let dims = value
            .parse()
            .with_context(|| format!("corrupt index_meta dims value: {}", value))?;
        Ok(Self { pool, dims })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the underlying pool. The index is unusable afterwards.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn document(&self, source_id: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query(
            "SELECT source_id, title, body_hash, chunk_count, indexed_at FROM documents WHERE source_id = ?",
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| DocumentRecord {
            source_id: r.get("source_id"),
            title: r.get("title"),
            body_hash: r.get("body_hash"),
            chunk_count: r.get("chunk_count"),
            indexed_at: r.get("indexed_at"),
        }))
    }

    pub async fn record_document(
        &self,
        doc: &Document,
        body_hash: &str,
        chunk_count: usize,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (source_id, title, source_url, body_hash, chunk_count,
                                   fetched_at, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_id) DO UPDATE SET
                title = excluded.title,
                source_url = excluded.source_url,
                body_hash = excluded.body_hash,
                chunk_count = excluded.chunk_count,
                fetched_at = excluded.fetched_at,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(&doc.source_id)
        .bind(&doc.title)
        .bind(&doc.source_url)
        .bind(body_hash)
        .bind(chunk_count as i64)
        .bind(doc.fetched_at.timestamp())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove a document row and all of its index entries.
    pub async fn forget_document(&self, source_id: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM index_entries WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM documents WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(removed)
    }

    pub async fn documents(&self) -> Result<Vec<DocumentRecord>> {
        let rows = sqlx::query(
            "SELECT source_id, title, body_hash, chunk_count, indexed_at FROM documents ORDER BY source_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| DocumentRecord {
                source_id: r.get("source_id"),
                title: r.get("title"),
                body_hash: r.get("body_hash"),
                chunk_count: r.get("chunk_count"),
                indexed_at: r.get("indexed_at"),
            })
            .collect())
    }

    /// All chunks of one source, in ordinal order.
    pub async fn chunks_for_source(&self, source_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT id, text, hash, metadata_json FROM index_entries WHERE source_id = ? ORDER BY chunk_ordinal",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_chunk).collect()
    }
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<Chunk> {
    let id: String = row.get("id");
    let metadata_json: String = row.get("metadata_json");
    let metadata: ChunkMetadata = serde_json::from_str(&metadata_json)
        .with_context(|| format!("invalid metadata for chunk {}", id))?;
    Ok(Chunk {
        id,
        text: row.get("text"),
        hash: row.get("hash"),
        metadata,
    })
}

#[async_trait]
impl VectorIndex for SqliteIndex {
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
        let meta = &entry.chunk.metadata;
        let metadata_json = serde_json::to_string(meta)?;

        sqlx::query(
            r#"
            INSERT INTO index_entries (id, source_id, chunk_ordinal, text, hash,
                                       metadata_json, dims, vector)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                text = excluded.text,
                hash = excluded.hash,
                metadata_json = excluded.metadata_json,
                dims = excluded.dims,
                vector = excluded.vector
            "#,
        )
        .bind(&entry.chunk.id)
        .bind(&meta.source_id)
        .bind(meta.chunk_ordinal)
        .bind(&entry.chunk.text)
        .bind(&entry.chunk.hash)
        .bind(&metadata_json)
        .bind(self.dims as i64)
        .bind(encode_vector(&entry.vector))
        .execute(&self.pool)
        .await?;

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

        let rows = match &filter.source_prefix {
            Some(prefix) => {
                sqlx::query(
                    "SELECT id, text, hash, metadata_json, vector FROM index_entries \
                     WHERE substr(source_id, 1, length(?1)) = ?1",
                )
                .bind(prefix)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT id, text, hash, metadata_json, vector FROM index_entries")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk = row_to_chunk(row)?;
            if !filter.matches(&chunk.metadata) {
                continue;
            }
            let blob: Vec<u8> = row.get("vector");
            let stored = decode_vector(&blob, self.dims)
                .with_context(|| format!("index entry {}", chunk.id))?;
            let score = cosine_similarity(vector, &stored);
            scored.push(RetrievalResult {
                chunk,
                score,
                rank: 0,
            });
        }

        Ok(rank_results(scored, k))
    }

    async fn delete_stale(&self, source_id: &str, keep: usize) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM index_entries WHERE source_id = ? AND chunk_ordinal >= ?")
                .bind(source_id)
                .bind(keep as i64)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn delete_source(&self, source_id: &str) -> Result<u64> {
        self.delete_stale(source_id, 0).await
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}
