//! Filesystem scan for the corpus under `ingest.root`.
//!
//! Walks the root with `walkdir`, keeps files matching `include_globs` and
//! not matching `exclude_globs` (plus `.git`, `target`, `node_modules`), and
//! returns them as [`Document`]s sorted by `source_id`, the path relative to
//! the root.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use docrag_core::models::Document;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::IngestConfig;

pub fn scan_documents(config: &IngestConfig) -> Result<Vec<Document>> {
    let root = &config.root;
    if !root.exists() {
        bail!("Ingest root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut docs = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match read_document(path, &rel_str)? {
            Some(doc) => docs.push(doc),
            None => tracing::warn!(path = %rel_str, "skipping file that is not valid UTF-8"),
        }
    }

    docs.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    Ok(docs)
}

fn read_document(path: &Path, source_id: &str) -> Result<Option<Document>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let Ok(body) = String::from_utf8(bytes) else {
        return Ok(None);
    };

    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string());

    Ok(Some(Document {
        source_id: source_id.to_string(),
        title,
        source_url: Some(format!("file://{}", path.display())),
        category: None,
        body,
        fetched_at: modified,
    }))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
