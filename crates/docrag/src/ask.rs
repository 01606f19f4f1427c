//! `docrag ask`: stream an answer to stdout.
//!
//! Tokens are printed as they arrive, followed by the cited sources. With
//! `--json` every event is printed as one JSON object per line instead.
//! Ctrl-C cancels the generation; nothing is printed after that.

use std::io::Write;

use anyhow::{anyhow, Result};
use docrag_core::chain::{GenerateOptions, GenerationEvent, GenerationStream};
use futures::StreamExt;

use crate::config::Config;
use crate::llm::create_model;
use crate::pipeline::Pipeline;
use crate::search::RetrieveArgs;

#[derive(Debug, Clone, Default)]
pub struct AskArgs {
    pub retrieve: RetrieveArgs,
    pub max_tokens: Option<u32>,
    pub json: bool,
}

impl AskArgs {
    pub fn options(&self, config: &Config) -> GenerateOptions {
        GenerateOptions {
            k: self.retrieve.k.unwrap_or(config.retrieval.k),
            score_threshold: self
                .retrieve
                .threshold
                .unwrap_or(config.retrieval.score_threshold),
            max_tokens: self.max_tokens.unwrap_or(config.llm.max_tokens),
            filters: self.retrieve.filter(),
            timeout: None,
        }
    }
}

/// How a rendered stream ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Answered,
    Failed(String),
    Cancelled,
}

pub async fn run_ask(config: &Config, question: &str, args: AskArgs) -> Result<()> {
    let model = create_model(&config.llm)?;
    let pipeline = Pipeline::open(config).await?;
    let chain = pipeline.chain(model, config);

    let stream = chain.generate(question, Vec::new(), args.options(config));
    let outcome = render(stream, args.json, &mut std::io::stdout()).await;
    pipeline.close().await;

    match outcome? {
        Outcome::Answered => Ok(()),
        Outcome::Cancelled => {
            eprintln!("cancelled");
            Ok(())
        }
        Outcome::Failed(message) => Err(anyhow!(message)),
    }
}

/// Write events to `out` until the stream ends or Ctrl-C is pressed.
pub async fn render(
    mut stream: GenerationStream,
    json: bool,
    out: &mut impl Write,
) -> Result<Outcome> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut renderer = Renderer::new(json);
    let mut outcome = Outcome::Cancelled;
    loop {
        tokio::select! {
            event = stream.next() => {
                let Some(event) = event else { break };
                out.write_all(renderer.render(&event)?.as_bytes())?;
                out.flush()?;
                match event {
                    GenerationEvent::Done { .. } => outcome = Outcome::Answered,
                    GenerationEvent::Error { kind, message, .. } => {
                        outcome = Outcome::Failed(format!("{}: {}", kind, message));
                    }
                    _ => {}
                }
            }
            _ = &mut ctrl_c => {
                stream.cancel();
                tracing::info!("generation cancelled by user");
                return Ok(Outcome::Cancelled);
            }
        }
    }
    Ok(outcome)
}

struct Renderer {
    json: bool,
    sources_started: bool,
}

impl Renderer {
    fn new(json: bool) -> Self {
        Self {
            json,
            sources_started: false,
        }
    }

    fn render(&mut self, event: &GenerationEvent) -> Result<String> {
        if self.json {
            return Ok(format!("{}\n", serde_json::to_string(event)?));
        }

        Ok(match event {
            GenerationEvent::Token { text } => text.clone(),
            GenerationEvent::SourceCitation(source) => {
                let markers: Vec<String> =
                    source.markers.iter().map(|m| format!("[^{}]", m)).collect();
                let header = if self.sources_started {
                    ""
                } else {
                    "\n\nSources:\n"
                };
                self.sources_started = true;
                format!("{}  {} {}\n", header, markers.join(""), source.source_id)
            }
            GenerationEvent::Done { sources, .. } => {
                if sources.is_empty() {
                    "\n\n(no sources cited)\n".to_string()
                } else {
                    String::new()
                }
            }
            GenerationEvent::Error {
                kind,
                message,
                partial_answer,
            } => {
                let gap = if partial_answer.is_empty() { "" } else { "\n" };
                format!("{}\nerror [{}]: {}\n", gap, kind, message)
            }
        })
    }
}
