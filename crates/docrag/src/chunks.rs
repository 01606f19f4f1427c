//! `docrag chunks <source_id>`: print the stored chunks of one source.

use anyhow::{bail, Result};
use docrag_core::models::Chunk;

use crate::config::Config;
use crate::db;
use crate::sqlite_index::SqliteIndex;

pub async fn run_chunks(config: &Config, source_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let index = SqliteIndex::open_existing(pool).await?;
    let chunks = index.chunks_for_source(source_id).await;
    index.close().await;
    let chunks = chunks?;

    if chunks.is_empty() {
        bail!("no chunks stored for source: {}", source_id);
    }

    println!("{} ({} chunks)", source_id, chunks.len());
    for chunk in &chunks {
        println!();
        println!("{}", describe(chunk));
        println!("{}", chunk.text);
    }
    Ok(())
}

fn describe(chunk: &Chunk) -> String {
    let meta = &chunk.metadata;
    let mut line = format!(
        "--- #{} [{}..{}] {}",
        meta.chunk_ordinal, meta.span_start, meta.span_end, chunk.id
    );
    if !meta.heading_path.is_empty() {
        line.push_str(&format!("  ({})", meta.heading_display()));
    }
    if meta.has_code_block {
        line.push_str(&format!("  code: {}", meta.code_languages.join(",")));
    }
    if !meta.symbols.is_empty() {
        line.push_str(&format!("  symbols: {}", meta.symbols.join(",")));
    }
    line
}
