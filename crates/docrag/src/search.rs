//! `docrag retrieve`: embed a query and print the passages that would be
//! handed to the model, without generating an answer.

use anyhow::{Context, Result};
use docrag_core::models::RetrievalResult;
use docrag_core::store::MetadataFilter;

use crate::config::Config;
use crate::pipeline::Pipeline;

/// Retrieval knobs that override the `[retrieval]` config section.
#[derive(Debug, Clone, Default)]
pub struct RetrieveArgs {
    pub k: Option<usize>,
    pub threshold: Option<f32>,
    pub source_prefix: Option<String>,
    pub code_only: bool,
    pub category: Option<String>,
}

impl RetrieveArgs {
    pub fn filter(&self) -> MetadataFilter {
        MetadataFilter {
            source_prefix: self.source_prefix.clone(),
            has_code_block: self.code_only.then_some(true),
            category: self.category.clone(),
            ..Default::default()
        }
    }
}

/// Embed `query` and return the ranked passages for it.
pub async fn retrieve_passages(
    pipeline: &Pipeline,
    config: &Config,
    query: &str,
    args: &RetrieveArgs,
) -> Result<Vec<RetrievalResult>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let vector = pipeline
        .embedder
        .embed(query)
        .await
        .context("embedding query")?;
    let results = pipeline
        .retriever
        .retrieve(
            &vector,
            args.k.unwrap_or(config.retrieval.k),
            args.threshold.unwrap_or(config.retrieval.score_threshold),
            &args.filter(),
        )
        .await?;
    Ok(results)
}

/// CLI entry point: calls [`retrieve_passages`] and prints results to stdout.
pub async fn run_retrieve(config: &Config, query: &str, args: RetrieveArgs) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;
    let results = retrieve_passages(&pipeline, config, query, &args).await;
    pipeline.close().await;
    let results = results?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for result in &results {
        let meta = &result.chunk.metadata;
        let heading = meta.heading_display();
        println!(
            "{}. [{:.2}] {}{}",
            result.rank + 1,
            result.score,
            meta.source_id,
            if heading.is_empty() {
                String::new()
            } else {
                format!(" > {}", heading)
            }
        );
        println!("    chunk: #{} ({})", meta.chunk_ordinal, result.chunk.id);
        if meta.has_code_block {
            println!("    code: {}", meta.code_languages.join(", "));
        }
        println!("    excerpt: \"{}\"", excerpt(&result.chunk.text, 240));
        println!();
    }

    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_flattens_and_truncates() {
        assert_eq!(excerpt("a\n  b\tc", 100), "a b c");
        assert_eq!(excerpt("héllo world", 5), "héllo...");
    }

    #[test]
    fn test_filter_from_args() {
        let args = RetrieveArgs {
            source_prefix: Some("api/".into()),
            code_only: true,
            category: Some("agents".into()),
            ..Default::default()
        };
        let filter = args.filter();
        assert_eq!(filter.source_prefix.as_deref(), Some("api/"));
        assert_eq!(filter.has_code_block, Some(true));
        assert_eq!(filter.category.as_deref(), Some("agents"));
    }
}
