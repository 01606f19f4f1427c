use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // One row per ingested source document
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            source_id TEXT PRIMARY KEY,
            title TEXT,
            source_url TEXT,
            body_hash TEXT NOT NULL,
            chunk_count INTEGER NOT NULL,
            fetched_at INTEGER NOT NULL,
            indexed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Vector index: chunk text, metadata and embedding per entry
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_entries (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            chunk_ordinal INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            metadata_json TEXT NOT NULL,
            dims INTEGER NOT NULL,
            vector BLOB NOT NULL,
            UNIQUE(source_id, chunk_ordinal)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Index-wide settings (embedding model and dimensionality)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_source ON index_entries(source_id)")
        .execute(pool)
        .await?;

    Ok(())
}
