//! # docrag CLI
//!
//! ## Usage
//!
//! ```bash
//! docrag --config ./config/docrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docrag init` | Create the SQLite database and run schema migrations |
//! | `docrag ingest` | Chunk, embed and index `ingest.root` and `ingest.urls` |
//! | `docrag retrieve "<q>"` | Print the passages retrieved for a query |
//! | `docrag ask "<q>"` | Stream a cited answer |
//! | `docrag stats` | Summarise the index |
//! | `docrag chunks <source_id>` | Print the stored chunks of one source |
//!
//! Logs go to stderr and are controlled by `RUST_LOG`
//! (default `docrag=info,docrag_core=info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docrag::ask::{run_ask, AskArgs};
use docrag::chunks::run_chunks;
use docrag::config;
use docrag::ingest::run_ingest;
use docrag::migrate;
use docrag::search::{run_retrieve, RetrieveArgs};
use docrag::stats::run_stats;

/// docrag: retrieval-augmented question answering over technical docs.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docrag.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "docrag", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by `retrieve` and `ask`.
#[derive(clap::Args)]
struct RetrieveFlags {
    /// Number of passages to retrieve (default: `retrieval.k`).
    #[arg(long)]
    k: Option<usize>,
    /// Minimum cosine similarity (default: `retrieval.score_threshold`).
    #[arg(long)]
    threshold: Option<f32>,
    /// Only sources whose id starts with this prefix.
    #[arg(long)]
    source: Option<String>,
    /// Only passages containing a code block.
    #[arg(long)]
    code_only: bool,
    /// Only passages from pages of this category (see `[[ingest.categories]]`).
    #[arg(long)]
    category: Option<String>,
}

impl From<RetrieveFlags> for RetrieveArgs {
    fn from(flags: RetrieveFlags) -> Self {
        RetrieveArgs {
            k: flags.k,
            threshold: flags.threshold,
            source_prefix: flags.source,
            code_only: flags.code_only,
            category: flags.category,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Ingest the corpus under `ingest.root` and the pages in `ingest.urls`.
    ///
    /// Unchanged documents (same body, chunk sizes and embedding model)
    /// are skipped unless `--full`.
    Ingest {
        /// Re-index every document, even unchanged ones.
        #[arg(long)]
        full: bool,
        /// Scan and chunk only; report counts without writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the passages retrieved for a query.
    Retrieve {
        query: String,
        #[command(flatten)]
        flags: RetrieveFlags,
    },

    /// Answer a question from the indexed docs, streaming tokens.
    ///
    /// Ctrl-C cancels the answer.
    Ask {
        question: String,
        #[command(flatten)]
        flags: RetrieveFlags,
        /// Output token limit (default: `llm.max_tokens`).
        #[arg(long)]
        max_tokens: Option<u32>,
        /// Print every stream event as one JSON object per line.
        #[arg(long)]
        json: bool,
    },

    /// Show index statistics.
    Stats,

    /// Print the stored chunks of one source.
    Chunks { source_id: String },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("docrag=info,docrag_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { full, dry_run } => {
            run_ingest(&cfg, full, dry_run).await?;
        }
        Commands::Retrieve { query, flags } => {
            run_retrieve(&cfg, &query, flags.into()).await?;
        }
        Commands::Ask {
            question,
            flags,
            max_tokens,
            json,
        } => {
            let args = AskArgs {
                retrieve: flags.into(),
                max_tokens,
                json,
            };
            run_ask(&cfg, &question, args).await?;
        }
        Commands::Stats => {
            run_stats(&cfg).await?;
        }
        Commands::Chunks { source_id } => {
            run_chunks(&cfg, &source_id).await?;
        }
    }

    Ok(())
}
