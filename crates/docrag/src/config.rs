//! TOML configuration parsing and validation.
//!
//! ```toml
//! [db]
//! path = "./data/docrag.sqlite"
//!
//! [chunking]
//! max_tokens = 375
//! overlap_tokens = 50
//!
//! [retrieval]
//! k = 5
//! score_threshold = 0.2
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [llm]
//! provider = "openai"
//! model = "gpt-4o-mini"
//!
//! [ingest]
//! root = "./docs"
//! urls = ["https://docs.example.com/guide/install"]
//! ```
//!
//! Every section except `[db]` and `[ingest]` has defaults. API keys are
//! read from the environment (`OPENAI_API_KEY`), never from this file.

use anyhow::{bail, Context, Result};
use docrag_core::chunk::ChunkParams;
use docrag_core::prompt::PromptTemplate;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkParams {
        ChunkParams::from_tokens(self.max_tokens, self.overlap_tokens)
    }
}

fn default_max_tokens() -> usize {
    375
}
fn default_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    #[serde(default = "default_overfetch")]
    pub overfetch_factor: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            score_threshold: default_score_threshold(),
            overfetch_factor: default_overfetch(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_score_threshold() -> f32 {
    0.2
}
fn default_overfetch() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    #[serde(default = "default_budget_chars")]
    pub budget_chars: usize,
    #[serde(flatten)]
    pub template: PromptTemplate,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            budget_chars: default_budget_chars(),
            template: PromptTemplate::default(),
        }
    }
}

fn default_budget_chars() -> usize {
    12_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (OpenAI-compatible endpoint or Ollama host).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens_out")]
    pub max_tokens: u32,
    /// Bound on each embed / retrieve / token step of a request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens_out(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_temperature() -> f32 {
    0.05
}
fn default_max_tokens_out() -> u32 {
    1024
}
fn default_request_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Web pages fetched and indexed next to the files under `root`.
    #[serde(default)]
    pub urls: Vec<String>,
    /// Pause between two page fetches.
    #[serde(default = "default_crawl_delay_ms")]
    pub crawl_delay_ms: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// URL path fragment to category, first match wins.
    #[serde(default)]
    pub categories: Vec<CategoryRule>,
}

impl IngestConfig {
    pub fn crawl_delay(&self) -> Duration {
        Duration::from_millis(self.crawl_delay_ms)
    }
}

/// `[[ingest.categories]] pattern = "modules/retrieval"`, `name = "retrieval"`.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct CategoryRule {
    pub pattern: String,
    pub name: String,
}

fn default_crawl_delay_ms() -> u64 {
    1000
}
fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.markdown".to_string(),
        "**/*.txt".to_string(),
        "**/*.rst".to_string(),
    ]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        bail!("chunking.overlap_tokens must be smaller than chunking.max_tokens");
    }

    // Retrieval
    if config.retrieval.k < 1 {
        bail!("retrieval.k must be >= 1");
    }
    if !(-1.0..=1.0).contains(&config.retrieval.score_threshold) {
        bail!("retrieval.score_threshold must be in [-1.0, 1.0]");
    }
    if config.retrieval.overfetch_factor < 1 {
        bail!("retrieval.overfetch_factor must be >= 1");
    }

    // Prompt
    if config.prompt.budget_chars == 0 {
        bail!("prompt.budget_chars must be > 0");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    // LLM
    match config.llm.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.llm.is_enabled() && config.llm.model.is_none() {
        bail!(
            "llm.model must be specified when provider is '{}'",
            config.llm.provider
        );
    }
    if config.llm.request_timeout_secs == 0 {
        bail!("llm.request_timeout_secs must be > 0");
    }

    // Ingest
    for url in &config.ingest.urls {
        let parsed = reqwest::Url::parse(url)
            .with_context(|| format!("ingest.urls: invalid URL '{}'", url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("ingest.urls: '{}' must be http or https", url);
        }
    }
    if !config.ingest.urls.is_empty() && config.ingest.fetch_timeout_secs == 0 {
        bail!("ingest.fetch_timeout_secs must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrag_core::prompt::SectionBudget;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    const MINIMAL: &str = r#"
[db]
path = "./data/docrag.sqlite"

[ingest]
root = "./docs"
"#;

    #[test]
    fn test_minimal_defaults() {
        let f = write_config(MINIMAL);
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.chunking.max_tokens, 375);
        assert_eq!(cfg.chunking.params().max_chars, 1500);
        assert_eq!(cfg.chunking.params().overlap_chars, 200);
        assert_eq!(cfg.retrieval.k, 5);
        assert_eq!(cfg.retrieval.overfetch_factor, 3);
        assert_eq!(cfg.prompt.budget_chars, 12_000);
        assert_eq!(cfg.prompt.template.history_budget, SectionBudget::Capped(2000));
        assert!(!cfg.embedding.is_enabled());
        assert!(!cfg.llm.is_enabled());
        assert_eq!(cfg.ingest.include_globs.len(), 4);
    }

    #[test]
    fn test_prompt_section_overrides() {
        let f = write_config(&format!(
            "{}\n[prompt]\nbudget_chars = 4000\nhistory_budget = {{ capped = 300 }}\nsystem = \"Be brief.\"\n",
            MINIMAL
        ));
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.prompt.budget_chars, 4000);
        assert_eq!(cfg.prompt.template.history_budget, SectionBudget::Capped(300));
        assert_eq!(cfg.prompt.template.system, "Be brief.");
    }

    #[test]
    fn test_enabled_embedding_requires_dims() {
        let f = write_config(&format!(
            "{}\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\n",
            MINIMAL
        ));
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_unknown_llm_provider() {
        let f = write_config(&format!("{}\n[llm]\nprovider = \"bard\"\n", MINIMAL));
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("Unknown llm provider"));
    }

    #[test]
    fn test_overlap_must_be_smaller() {
        let f = write_config(&format!(
            "{}\n[chunking]\nmax_tokens = 10\noverlap_tokens = 10\n",
            MINIMAL
        ));
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_ingest_web_section() {
        let f = write_config(
            r#"
[db]
path = "./data/docrag.sqlite"

[ingest]
root = "./docs"
urls = ["https://docs.example.com/modules/retrieval/vectorstores"]
crawl_delay_ms = 0

[[ingest.categories]]
pattern = "modules/retrieval"
name = "retrieval"
"#,
        );
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.ingest.urls.len(), 1);
        assert_eq!(cfg.ingest.crawl_delay(), Duration::ZERO);
        assert_eq!(cfg.ingest.fetch_timeout_secs, 30);
        assert_eq!(
            cfg.ingest.categories,
            vec![CategoryRule {
                pattern: "modules/retrieval".into(),
                name: "retrieval".into(),
            }]
        );
        assert!(load_config(write_config(MINIMAL).path()).unwrap().ingest.urls.is_empty());
    }

    #[test]
    fn test_ingest_urls_must_be_http() {
        let f = write_config(&format!("{}urls = [\"ftp://example.com/docs\"]\n", MINIMAL));
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("http or https"));

        let f = write_config(&format!("{}urls = [\"not a url\"]\n", MINIMAL));
        assert!(load_config(f.path()).is_err());
    }
}
