//! Ingestion: scan the corpus and fetch `ingest.urls`, then chunk, embed,
//! and write the index.
//!
//! Sources whose fingerprint (body, chunking parameters and embedding
//! model) matches the stored one are skipped unless `--full` is given. Sources that disappeared from the scan are removed
//! together with their entries; a page that failed to fetch keeps its old
//! entries. A failing source is logged and counted; it does not stop the
//! run.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Result};
use docrag_core::chunk::{chunk_document, ChunkParams};
use docrag_core::indexer::index_document;
use docrag_core::models::Document;
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::pipeline::Pipeline;
use crate::retry::{BackoffPolicy, RetryingEmbedder};
use crate::scan::scan_documents;
use crate::web::fetch_pages;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub scanned: usize,
    pub indexed: usize,
    pub unchanged: usize,
    pub empty: usize,
    pub failed: usize,
    pub chunks_written: usize,
    pub warnings: usize,
    pub stale_entries_removed: u64,
    pub sources_removed: usize,
    /// Pages in `ingest.urls` that could not be fetched.
    pub fetch_failed: usize,
}

pub async fn run_ingest(config: &Config, full: bool, dry_run: bool) -> Result<()> {
    if dry_run {
        return dry_run_report(config).await;
    }

    let pipeline = Pipeline::open(config).await?;
    let result = ingest(&pipeline, config, full).await;
    pipeline.close().await;
    let summary = result?;

    println!("ingest {}", config.ingest.root.display());
    println!("  scanned: {} documents", summary.scanned);
    println!("  indexed: {}", summary.indexed);
    println!("  unchanged: {}", summary.unchanged);
    if summary.empty > 0 {
        println!("  empty: {}", summary.empty);
    }
    println!("  chunks written: {}", summary.chunks_written);
    if summary.warnings > 0 {
        println!("  data quality warnings: {}", summary.warnings);
    }
    println!("  stale entries removed: {}", summary.stale_entries_removed);
    println!("  sources removed: {}", summary.sources_removed);
    if summary.fetch_failed > 0 {
        println!("  pages not fetched: {}", summary.fetch_failed);
    }

    if summary.failed > 0 {
        println!("  failed: {}", summary.failed);
        bail!("{} document(s) failed to index", summary.failed);
    }
    println!("ok");
    Ok(())
}

async fn dry_run_report(config: &Config) -> Result<()> {
    let (docs, _) = collect_documents(config).await?;
    let params = config.chunking.params();

    let mut chunks = 0;
    let mut warnings = 0;
    for doc in &docs {
        let output = chunk_document(doc, &params);
        chunks += output.chunks.len();
        warnings += output.warnings.len();
    }

    println!("ingest {} (dry-run)", config.ingest.root.display());
    println!("  documents found: {}", docs.len());
    println!("  estimated chunks: {}", chunks);
    if warnings > 0 {
        println!("  data quality warnings: {}", warnings);
    }
    Ok(())
}

/// Scanned files followed by fetched pages, plus the URLs that failed.
async fn collect_documents(config: &Config) -> Result<(Vec<Document>, Vec<String>)> {
    let mut docs = scan_documents(&config.ingest)?;
    if config.ingest.urls.is_empty() {
        return Ok((docs, Vec::new()));
    }
    let fetched = fetch_pages(&config.ingest).await?;
    docs.extend(fetched.docs);
    Ok((docs, fetched.failed))
}

/// Run one ingestion pass against an open pipeline.
pub async fn ingest(pipeline: &Pipeline, config: &Config, full: bool) -> Result<IngestSummary> {
    let (docs, unreachable) = collect_documents(config).await?;
    let mut summary = ingest_documents(pipeline, config, &docs, &unreachable, full).await?;
    summary.fetch_failed = unreachable.len();
    Ok(summary)
}

/// Index `docs` and forget every known source not among them, except the
/// ones listed in `keep`.
pub async fn ingest_documents(
    pipeline: &Pipeline,
    config: &Config,
    docs: &[Document],
    keep: &[String],
    full: bool,
) -> Result<IngestSummary> {
    let params = config.chunking.params();
    let model = pipeline.embedder.model_name().to_string();
    let embedder = RetryingEmbedder::new(
        Arc::clone(&pipeline.embedder),
        BackoffPolicy::new(config.embedding.max_retries),
    );
    let index = pipeline.index.as_ref();

    let mut summary = IngestSummary {
        scanned: docs.len(),
        ..Default::default()
    };

    for doc in docs {
        if doc.body.trim().is_empty() {
            summary.empty += 1;
            continue;
        }

        let hash = fingerprint(doc, &params, &model);
        if !full {
            if let Some(existing) = index.document(&doc.source_id).await? {
                if existing.body_hash == hash {
                    summary.unchanged += 1;
                    continue;
                }
            }
        }

        match index_document(doc, &params, &embedder, index).await {
            Ok(report) => {
                index
                    .record_document(doc, &hash, report.chunks.len())
                    .await?;
                summary.indexed += 1;
                summary.chunks_written += report.chunks.len();
                summary.warnings += report.warnings.len();
                summary.stale_entries_removed += report.removed;
                tracing::info!(
                    source_id = %doc.source_id,
                    chunks = report.chunks.len(),
                    "indexed"
                );
            }
            Err(e) => {
                summary.failed += 1;
                tracing::error!(source_id = %doc.source_id, error = %format!("{:#}", e), "indexing failed");
            }
        }
    }

    // A document that became empty loses its old entries here.
    let present: HashSet<&str> = docs
        .iter()
        .filter(|d| !d.body.trim().is_empty())
        .map(|d| d.source_id.as_str())
        .chain(keep.iter().map(String::as_str))
        .collect();
    for record in index.documents().await? {
        if !present.contains(record.source_id.as_str()) {
            let removed = index.forget_document(&record.source_id).await?;
            summary.sources_removed += 1;
            summary.stale_entries_removed += removed;
            tracing::info!(source_id = %record.source_id, removed, "removed vanished source");
        }
    }

    Ok(summary)
}

/// Hash of everything that shapes a source's entries. Changing the
/// chunk sizes or the embedding model re-indexes every source.
fn fingerprint(doc: &Document, params: &ChunkParams, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(doc.body.as_bytes());
    hasher.update([0u8]);
    hasher.update(doc.category.as_deref().unwrap_or_default().as_bytes());
    hasher.update([0u8]);
    hasher.update((params.max_chars as u64).to_le_bytes());
    hasher.update((params.overlap_chars as u64).to_le_bytes());
    hasher.update(model.as_bytes());
    format!("{:x}", hasher.finalize())
}
