//! Index statistics.
//!
//! Summarises what `docrag ingest` has written: document and entry counts,
//! the embedding model the index was built with, and a per-document table.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

#[derive(Debug, Clone, PartialEq)]
pub struct IndexStats {
    pub documents: i64,
    pub entries: i64,
    pub code_entries: i64,
    pub model: Option<String>,
    pub dims: Option<String>,
    pub per_document: Vec<DocumentStats>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentStats {
    pub source_id: String,
    pub entries: i64,
    pub indexed_at: i64,
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<IndexStats> {
    let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?;
    let entries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries")
        .fetch_one(pool)
        .await?;
    let code_entries: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM index_entries WHERE json_extract(metadata_json, '$.has_code_block') = 1",
    )
    .fetch_one(pool)
    .await?;

    let model: Option<String> =
        sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'model'")
            .fetch_optional(pool)
            .await?;
    let dims: Option<String> = sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'dims'")
        .fetch_optional(pool)
        .await?;

    let rows = sqlx::query(
        r#"
        SELECT d.source_id, d.indexed_at, COUNT(e.id) AS entries
        FROM documents d
        LEFT JOIN index_entries e ON e.source_id = d.source_id
        GROUP BY d.source_id
        ORDER BY entries DESC, d.source_id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let per_document = rows
        .iter()
        .map(|row| DocumentStats {
            source_id: row.get("source_id"),
            entries: row.get("entries"),
            indexed_at: row.get("indexed_at"),
        })
        .collect();

    Ok(IndexStats {
        documents,
        entries,
        code_entries,
        model,
        dims,
        per_document,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool).await;
    pool.close().await;
    let stats = stats?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("docrag index stats");
    println!("==================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!(
        "  Model:       {} ({} dims)",
        stats.model.as_deref().unwrap_or("none"),
        stats.dims.as_deref().unwrap_or("?")
    );
    println!();
    println!("  Documents:   {}", stats.documents);
    println!("  Entries:     {}", stats.entries);
    println!("  With code:   {}", stats.code_entries);

    if !stats.per_document.is_empty() {
        println!();
        println!("  {:<48} {:>8}   {}", "SOURCE", "ENTRIES", "INDEXED");
        println!("  {}", "-".repeat(72));
        for doc in &stats.per_document {
            println!(
                "  {:<48} {:>8}   {}",
                doc.source_id,
                doc.entries,
                format_ts_relative(doc.indexed_at)
            );
        }
    }
    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    let plural = |n: i64| if n == 1 { "" } else { "s" };
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        format!("{} min{} ago", delta / 60, plural(delta / 60))
    } else if delta < 86400 {
        format!("{} hour{} ago", delta / 3600, plural(delta / 3600))
    } else if delta < 86400 * 30 {
        format!("{} day{} ago", delta / 86400, plural(delta / 86400))
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_format_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
    }
}
