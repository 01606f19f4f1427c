//! Wiring of the SQLite index, embedder and retriever shared by the
//! `ingest`, `retrieve` and `ask` commands.

use std::sync::Arc;

use anyhow::{bail, Result};
use docrag_core::chain::{ChainConfig, RagChain};
use docrag_core::embedding::Embedder;
use docrag_core::llm::LanguageModel;
use docrag_core::prompt::PromptAssembler;
use docrag_core::retrieve::Retriever;

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::sqlite_index::SqliteIndex;

pub struct Pipeline {
    pub index: Arc<SqliteIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub retriever: Arc<Retriever>,
}

impl Pipeline {
    /// Open the database and build the configured embedder.
    pub async fn open(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        Self::open_with(config, embedder).await
    }

    /// Open the database with an explicit embedder.
    pub async fn open_with(config: &Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if embedder.dims() == 0 {
            bail!("Embeddings are disabled; set [embedding] provider, model and dims in the config");
        }

        let pool = db::connect(config).await?;
        let index = Arc::new(SqliteIndex::open(pool, embedder.dims(), embedder.model_name()).await?);
        let retriever = Arc::new(
            Retriever::new(index.clone()).with_overfetch(config.retrieval.overfetch_factor),
        );

        Ok(Self {
            index,
            embedder,
            retriever,
        })
    }

    /// Build a generation chain over this pipeline's index.
    pub fn chain(&self, model: Arc<dyn LanguageModel>, config: &Config) -> RagChain {
        RagChain::new(
            self.embedder.clone(),
            self.retriever.clone(),
            Arc::new(PromptAssembler::new(config.prompt.template.clone())),
            model,
            chain_config(config),
        )
    }

    pub async fn close(&self) {
        self.index.close().await;
    }
}

pub fn chain_config(config: &Config) -> ChainConfig {
    ChainConfig {
        budget_chars: config.prompt.budget_chars,
        temperature: config.llm.temperature,
        default_timeout: config.llm.request_timeout(),
        ..ChainConfig::default()
    }
}
