use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use tempfile::TempDir;

use docrag::ask::{render, AskArgs, Outcome};
use docrag::config::{load_config, Config};
use docrag::ingest::ingest;
use docrag::pipeline::Pipeline;
use docrag::search::{retrieve_passages, RetrieveArgs};
use docrag_core::embedding::Embedder;
use docrag_core::llm::{LanguageModel, ModelRequest, TokenStream};
use docrag_core::store::VectorIndex;
use docrag_core::GenerationEvent;

const VOCAB: [&str; 8] = [
    "tokio",
    "runtime",
    "python",
    "pip",
    "docker",
    "kubernetes",
    "install",
    "error",
];

/// Bag-of-words embedder over a tiny fixed vocabulary, plus a bias term.
struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }
    fn dims(&self) -> usize {
        VOCAB.len() + 1
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let lower = text.to_lowercase();
        let mut v: Vec<f32> = VOCAB
            .iter()
            .map(|w| lower.matches(w).count() as f32)
            .collect();
        v.push(0.1);
        Ok(v)
    }
}

/// Model that replays fixed tokens and records the prompt it was given.
struct ScriptedModel {
    tokens: Vec<String>,
    seen: Mutex<Option<ModelRequest>>,
}

impl ScriptedModel {
    fn new(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            seen: Mutex::new(None),
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }
    async fn stream(&self, request: &ModelRequest) -> Result<TokenStream> {
        *self.seen.lock().unwrap() = Some(request.clone());
        let tokens: Vec<Result<String>> = self.tokens.iter().cloned().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(tokens)))
    }
}

fn write_docs(root: &Path) {
    let docs = root.join("docs");
    fs::create_dir_all(&docs).unwrap();
    fs::write(
        docs.join("tokio.md"),
        "# Tokio\n\nThe tokio runtime drives async tasks.\n\n```rust\n#[tokio::main]\nasync fn main() {}\n```\n",
    )
    .unwrap();
    fs::write(
        docs.join("python.md"),
        "# Python\n\nInstall the client with pip install docrag.\n",
    )
    .unwrap();
    fs::write(
        docs.join("deploy.md"),
        "# Deploy\n\nRun it under docker or kubernetes.\n",
    )
    .unwrap();
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    write_docs(&root);

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_content = format!(
        r#"[db]
path = "{root}/data/docrag.sqlite"

[retrieval]
k = 3
score_threshold = 0.2

[ingest]
root = "{root}/docs"
"#,
        root = root.display()
    );
    let config_path = config_dir.join("docrag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

async fn open_pipeline(cfg: &Config) -> Pipeline {
    docrag::migrate::run_migrations(cfg).await.unwrap();
    Pipeline::open_with(cfg, Arc::new(KeywordEmbedder))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_ingest_retrieve_ask() {
    let (_tmp, config_path) = setup_test_env();
    let cfg = load_config(&config_path).unwrap();
    let pipeline = open_pipeline(&cfg).await;

    let summary = ingest(&pipeline, &cfg, false).await.unwrap();
    assert_eq!(summary.scanned, 3);
    assert_eq!(summary.indexed, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(pipeline.index.count().await.unwrap(), 3);

    let results = retrieve_passages(
        &pipeline,
        &cfg,
        "How do I configure the tokio runtime?",
        &RetrieveArgs::default(),
    )
    .await
    .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].chunk.metadata.source_id, "tokio.md");
    assert_eq!(results[0].rank, 0);
    assert!(results[0].chunk.metadata.has_code_block);
    assert!(results.iter().all(|r| r.score >= 0.2));

    let model = Arc::new(ScriptedModel::new(&[
        "Use the tokio runtime",
        " [^1]",
        " and [^7].",
    ]));
    let chain = pipeline.chain(model.clone(), &cfg);
    let stream = chain.generate(
        "How do I configure the tokio runtime?",
        Vec::new(),
        AskArgs::default().options(&cfg),
    );
    let events: Vec<GenerationEvent> = stream.collect().await;

    let request = model.seen.lock().unwrap().clone().unwrap();
    assert!(request.user.contains("[^1] (tokio.md > Tokio)"));
    assert!(request.user.contains("How do I configure the tokio runtime?"));

    match events.last().unwrap() {
        GenerationEvent::Done { answer, sources } => {
            assert_eq!(sources, &vec!["tokio.md".to_string()]);
            assert!(answer.contains("[^1]"));
            assert!(!answer.contains("[^7]"));
        }
        other => panic!("expected done, got {:?}", other),
    }
    let streamed: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            GenerationEvent::Token { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, vec!["Use the tokio runtime", " [^1]", " and."]);

    pipeline.close().await;
}

#[tokio::test]
async fn test_reingest_is_incremental() {
    let (tmp, config_path) = setup_test_env();
    let cfg = load_config(&config_path).unwrap();
    let pipeline = open_pipeline(&cfg).await;

    ingest(&pipeline, &cfg, false).await.unwrap();
    let before = pipeline.index.count().await.unwrap();

    let again = ingest(&pipeline, &cfg, false).await.unwrap();
    assert_eq!(again.indexed, 0);
    assert_eq!(again.unchanged, 3);
    assert_eq!(pipeline.index.count().await.unwrap(), before);

    let full = ingest(&pipeline, &cfg, true).await.unwrap();
    assert_eq!(full.indexed, 3);
    assert_eq!(pipeline.index.count().await.unwrap(), before);

    fs::remove_file(tmp.path().join("docs/deploy.md")).unwrap();
    fs::write(tmp.path().join("docs/python.md"), "   \n").unwrap();
    let pruned = ingest(&pipeline, &cfg, false).await.unwrap();
    assert_eq!(pruned.sources_removed, 2);
    assert_eq!(pruned.empty, 1);
    assert_eq!(pipeline.index.count().await.unwrap(), 1);
    assert_eq!(pipeline.index.documents().await.unwrap().len(), 1);

    pipeline.close().await;
}

#[tokio::test]
async fn test_chunking_change_reindexes() {
    let (_tmp, config_path) = setup_test_env();
    let mut cfg = load_config(&config_path).unwrap();
    let pipeline = open_pipeline(&cfg).await;

    ingest(&pipeline, &cfg, false).await.unwrap();

    cfg.chunking.max_tokens = 100;
    let resized = ingest(&pipeline, &cfg, false).await.unwrap();
    assert_eq!(resized.indexed, 3);
    assert_eq!(resized.unchanged, 0);

    let again = ingest(&pipeline, &cfg, false).await.unwrap();
    assert_eq!(again.indexed, 0);
    assert_eq!(again.unchanged, 3);

    pipeline.close().await;
}

/// Answer each incoming connection with the next canned `(status, body)`.
async fn serve_pages(responses: Vec<(&'static str, &'static str)>) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        for (status, body) in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let reply = format!(
                "HTTP/1.1 {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        }
    });
    format!("http://{}", addr)
}

const CLUSTER_PAGE: &str = "<html><head><title>Cluster deploys</title></head><body>\
    <main><h1>Cluster</h1><p>Ship the image to kubernetes with docker push.</p>\
    <pre><code class=\"language-bash\">kubectl apply -f deploy.yaml</code></pre></main></body></html>";

#[tokio::test]
async fn test_web_pages_ingested_with_category() {
    let (_tmp, config_path) = setup_test_env();
    let base = serve_pages(vec![("200 OK", CLUSTER_PAGE), ("503 Service Unavailable", "")]).await;
    let url = format!("{}/docs/deploy/cluster", base);
    let mut config = fs::read_to_string(&config_path).unwrap();
    config.push_str(&format!(
        "urls = [\"{}\"]\ncrawl_delay_ms = 0\n\n[[ingest.categories]]\npattern = \"deploy\"\nname = \"operations\"\n",
        url
    ));
    fs::write(&config_path, config).unwrap();
    let cfg = load_config(&config_path).unwrap();
    let pipeline = open_pipeline(&cfg).await;

    let summary = ingest(&pipeline, &cfg, false).await.unwrap();
    assert_eq!(summary.scanned, 4);
    assert_eq!(summary.indexed, 4);
    assert_eq!(summary.fetch_failed, 0);

    let args = RetrieveArgs {
        category: Some("operations".into()),
        ..Default::default()
    };
    let results = retrieve_passages(&pipeline, &cfg, "docker and kubernetes", &args)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    let meta = &results[0].chunk.metadata;
    assert_eq!(meta.source_id, url);
    assert_eq!(meta.category.as_deref(), Some("operations"));
    assert_eq!(meta.heading_path, vec!["Cluster".to_string()]);
    assert_eq!(meta.code_languages, vec!["bash".to_string()]);

    // The page is down on the next run; its entries stay.
    let before = pipeline.index.count().await.unwrap();
    let rerun = ingest(&pipeline, &cfg, false).await.unwrap();
    assert_eq!(rerun.fetch_failed, 1);
    assert_eq!(rerun.sources_removed, 0);
    assert_eq!(pipeline.index.count().await.unwrap(), before);

    pipeline.close().await;
}

#[tokio::test]
async fn test_render_text_answer() {
    let (_tmp, config_path) = setup_test_env();
    let cfg = load_config(&config_path).unwrap();
    let pipeline = open_pipeline(&cfg).await;
    ingest(&pipeline, &cfg, false).await.unwrap();

    let model = Arc::new(ScriptedModel::new(&["Run it under docker", " [^1]."]));
    let chain = pipeline.chain(model, &cfg);
    let stream = chain.generate(
        "docker or kubernetes?",
        Vec::new(),
        AskArgs::default().options(&cfg),
    );

    let mut out = Vec::new();
    let outcome = render(stream, false, &mut out).await.unwrap();
    assert_eq!(outcome, Outcome::Answered);
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("Run it under docker [^1]."));
    assert!(text.contains("Sources:\n  [^1] deploy.md"));

    pipeline.close().await;
}

// ============ CLI ============

fn run_docrag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_docrag"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to run docrag binary");
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

#[test]
fn test_cli_init_dry_run_and_stats() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, ok) = run_docrag(&config_path, &["init"]);
    assert!(ok);
    assert!(stdout.contains("Database initialized successfully."));

    let (stdout, _, ok) = run_docrag(&config_path, &["ingest", "--dry-run"]);
    assert!(ok);
    assert!(stdout.contains("documents found: 3"));
    assert!(stdout.contains("estimated chunks: 3"));

    let (stdout, _, ok) = run_docrag(&config_path, &["stats"]);
    assert!(ok);
    assert!(stdout.contains("Documents:   0"));
}

#[test]
fn test_cli_requires_embeddings_for_retrieve() {
    let (_tmp, config_path) = setup_test_env();
    run_docrag(&config_path, &["init"]);

    let (_, stderr, ok) = run_docrag(&config_path, &["retrieve", "tokio"]);
    assert!(!ok);
    assert!(stderr.contains("Embeddings are disabled"));
}

#[test]
fn test_cli_missing_config() {
    let (_, stderr, ok) = run_docrag(Path::new("/nonexistent/docrag.toml"), &["stats"]);
    assert!(!ok);
    assert!(stderr.contains("Failed to read config file"));
}
