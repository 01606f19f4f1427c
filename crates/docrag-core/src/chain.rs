//! Streaming generation chain.
//!
//! [`RagChain::generate`] spawns one tokio task per request. The task walks
//! the [`ChainState`] machine
//!
//! ```text
//! Init → Embedding → Retrieving → Assembling → Generating → Finalizing → Done
//!   └──────────┴───────────┴────────────┴────────────┴────────────┴──→ Failed
//! ```
//!
//! and sends [`GenerationEvent`]s over a bounded channel to the
//! [`GenerationStream`] held by the caller. Every external call (embed,
//! retrieve, each model token) is bounded by the request timeout and raced
//! against the consumer going away, so cancelling or dropping the stream
//! stops the task at its next suspension point without emitting `done`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::citation::{self, MarkerFilter, SourceCitation};
use crate::embedding::Embedder;
use crate::error::{ErrorKind, RagError, Stage};
use crate::llm::{LanguageModel, ModelRequest};
use crate::models::HistoryTurn;
use crate::prompt::PromptAssembler;
use crate::retrieve::Retriever;
use crate::store::MetadataFilter;

/// One event of a generation stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    /// A model text fragment, forwarded as soon as it arrives.
    Token { text: String },
    /// A source the final answer cites.
    SourceCitation(SourceCitation),
    /// Successful end of stream.
    Done { answer: String, sources: Vec<String> },
    /// Failed end of stream. `partial_answer` holds the tokens already sent.
    Error {
        kind: ErrorKind,
        message: String,
        partial_answer: String,
    },
}

impl GenerationEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationEvent::Done { .. } | GenerationEvent::Error { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Init,
    Embedding,
    Retrieving,
    Assembling,
    Generating,
    Finalizing,
    Done,
    Failed,
    Cancelled,
}

impl ChainState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ChainState::Done | ChainState::Failed | ChainState::Cancelled)
    }

    pub fn can_transition_to(self, next: ChainState) -> bool {
        use ChainState::*;
        match (self, next) {
            (from, Failed | Cancelled) => !from.is_terminal(),
            (Init, Embedding)
            | (Embedding, Retrieving)
            | (Retrieving, Assembling)
            | (Assembling, Generating)
            | (Generating, Finalizing)
            | (Finalizing, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChainState::Init => "init",
            ChainState::Embedding => "embedding",
            ChainState::Retrieving => "retrieving",
            ChainState::Assembling => "assembling",
            ChainState::Generating => "generating",
            ChainState::Finalizing => "finalizing",
            ChainState::Done => "done",
            ChainState::Failed => "failed",
            ChainState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Per-request knobs.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub k: usize,
    pub score_threshold: f32,
    pub max_tokens: u32,
    pub filters: MetadataFilter,
    /// Bound on each external call; falls back to [`ChainConfig::default_timeout`].
    pub timeout: Option<Duration>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            k: 5,
            score_threshold: 0.0,
            max_tokens: 1024,
            filters: MetadataFilter::default(),
            timeout: None,
        }
    }
}

/// Settings shared by every request of a chain.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Prompt budget in characters.
    pub budget_chars: usize,
    pub temperature: f32,
    pub default_timeout: Duration,
    /// Capacity of the event channel between task and consumer.
    pub channel_capacity: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            budget_chars: 12_000,
            temperature: 0.05,
            default_timeout: Duration::from_secs(30),
            channel_capacity: 64,
        }
    }
}

/// The retrieval-augmented generation pipeline.
///
/// Cheap to clone; every collaborator is a shared handle and the chain holds
/// no per-request state.
#[derive(Clone)]
pub struct RagChain {
    embedder: Arc<dyn Embedder>,
    retriever: Arc<Retriever>,
    assembler: Arc<PromptAssembler>,
    model: Arc<dyn LanguageModel>,
    config: ChainConfig,
}

impl RagChain {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        retriever: Arc<Retriever>,
        assembler: Arc<PromptAssembler>,
        model: Arc<dyn LanguageModel>,
        config: ChainConfig,
    ) -> Self {
        Self {
            embedder,
            retriever,
            assembler,
            model,
            config,
        }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Start answering `query`. Must be called inside a tokio runtime.
    pub fn generate(
        &self,
        query: impl Into<String>,
        history: Vec<HistoryTurn>,
        options: GenerateOptions,
    ) -> GenerationStream {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let query = query.into();
        let limit = options.timeout.unwrap_or(self.config.default_timeout);
        let span = tracing::info_span!("generate", k = options.k, timeout_ms = limit.as_millis() as u64);

        let worker = Worker {
            chain: self.clone(),
            tx,
            state: ChainState::Init,
            partial: String::new(),
            limit,
        };
        tokio::spawn(worker.run(query, history, options).instrument(span));

        GenerationStream {
            rx,
            cancelled: false,
        }
    }
}

/// Consumer side of one generation.
///
/// Yields events until `done` or `error`, then ends. Dropping it cancels
/// the generation.
pub struct GenerationStream {
    rx: mpsc::Receiver<GenerationEvent>,
    cancelled: bool,
}

impl GenerationStream {
    /// Stop the generation. No event is yielded after this returns.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.rx.close();
    }
}

impl Stream for GenerationStream {
    type Item = GenerationEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancelled {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

enum Flow {
    Completed,
    Cancelled,
}

struct Worker {
    chain: RagChain,
    tx: mpsc::Sender<GenerationEvent>,
    state: ChainState,
    partial: String,
    limit: Duration,
}

impl Worker {
    async fn run(mut self, query: String, history: Vec<HistoryTurn>, options: GenerateOptions) {
        match self.drive(&query, &history, &options).await {
            Ok(Flow::Completed) => {}
            Ok(Flow::Cancelled) => {
                self.transition(ChainState::Cancelled);
                tracing::info!(tokens_chars = self.partial.len(), "generation cancelled by consumer");
            }
            Err(err) => {
                let from = self.state;
                self.transition(ChainState::Failed);
                tracing::warn!(kind = %err.kind(), stage = %from, "generation failed: {}", err);
                let event = GenerationEvent::Error {
                    kind: err.kind(),
                    message: err.to_string(),
                    partial_answer: std::mem::take(&mut self.partial),
                };
                // Receiver gone means nobody is left to tell.
                let _ = self.tx.send(event).await;
            }
        }
    }

    fn transition(&mut self, next: ChainState) {
        if !self.state.can_transition_to(next) {
            tracing::error!(from = %self.state, to = %next, "invalid chain state transition");
            return;
        }
        tracing::debug!(from = %self.state, to = %next, "chain state");
        self.state = next;
    }

    /// Run `fut` under the request timeout. `Ok(None)` means the consumer
    /// went away first.
    async fn call<T, F>(
        tx: &mpsc::Sender<GenerationEvent>,
        stage: Stage,
        limit: Duration,
        fut: F,
    ) -> Result<Option<T>, RagError>
    where
        F: Future<Output = Result<T, RagError>>,
    {
        tokio::select! {
            biased;
            _ = tx.closed() => Ok(None),
            res = tokio::time::timeout(limit, fut) => match res {
                Ok(inner) => inner.map(Some),
                Err(_) => Err(RagError::Timeout { stage, limit }),
            },
        }
    }

    async fn emit(&self, event: GenerationEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    /// Send scrubbed text as a `token` event. Empty text is skipped.
    async fn forward(&mut self, text: String) -> bool {
        if text.is_empty() {
            return true;
        }
        self.partial.push_str(&text);
        self.emit(GenerationEvent::Token { text }).await
    }

    async fn drive(
        &mut self,
        query: &str,
        history: &[HistoryTurn],
        options: &GenerateOptions,
    ) -> Result<Flow, RagError> {
        let chain = self.chain.clone();
        let limit = self.limit;

        self.transition(ChainState::Embedding);
        let embed = async {
            chain
                .embedder
                .embed(query)
                .await
                .map_err(RagError::Embedding)
        };
        let Some(vector) = Self::call(&self.tx, Stage::Embed, limit, embed).await? else {
            return Ok(Flow::Cancelled);
        };

        self.transition(ChainState::Retrieving);
        let retrieve = chain.retriever.retrieve(
            &vector,
            options.k,
            options.score_threshold,
            &options.filters,
        );
        let Some(results) = Self::call(&self.tx, Stage::Retrieve, limit, retrieve).await? else {
            return Ok(Flow::Cancelled);
        };
        if results.is_empty() {
            tracing::info!("no context passed retrieval; generating with empty context");
        }

        self.transition(ChainState::Assembling);
        let request = chain
            .assembler
            .assemble(query, &results, history, chain.config.budget_chars)?;
        tracing::debug!(
            included = request.included.len(),
            retrieved = results.len(),
            prompt_chars = request.prompt_chars(),
            "prompt assembled"
        );

        self.transition(ChainState::Generating);
        let model_request = ModelRequest {
            system: request.system.clone(),
            user: request.user.clone(),
            max_tokens: options.max_tokens,
            temperature: chain.config.temperature,
        };
        let open = async {
            chain
                .model
                .stream(&model_request)
                .await
                .map_err(RagError::Generation)
        };
        let Some(mut tokens) = Self::call(&self.tx, Stage::ModelToken, limit, open).await? else {
            return Ok(Flow::Cancelled);
        };

        let mut filter = MarkerFilter::new(&request.citations);
        loop {
            let next = async { Ok(tokens.next().await) };
            let fragment = match Self::call(&self.tx, Stage::ModelToken, limit, next).await? {
                None => return Ok(Flow::Cancelled),
                Some(None) => break,
                Some(Some(Err(e))) => return Err(RagError::Generation(e)),
                Some(Some(Ok(text))) => text,
            };
            if !self.forward(filter.push(&fragment)).await {
                return Ok(Flow::Cancelled);
            }
        }
        drop(tokens);
        if !self.forward(filter.finish()).await {
            return Ok(Flow::Cancelled);
        }

        self.transition(ChainState::Finalizing);
        let resolved = citation::resolve(&self.partial, &request.citations);
        if filter.stripped() > 0 {
            tracing::warn!(
                stripped = filter.stripped(),
                "removed citation markers that match no injected source"
            );
        }
        let sources: Vec<String> = resolved
            .sources
            .iter()
            .map(|s| s.source_id.clone())
            .collect();
        for source in resolved.sources {
            if !self.emit(GenerationEvent::SourceCitation(source)).await {
                return Ok(Flow::Cancelled);
            }
        }
        let done = GenerationEvent::Done {
            answer: resolved.answer,
            sources,
        };
        if !self.emit(done).await {
            return Ok(Flow::Cancelled);
        }

        self.transition(ChainState::Done);
        Ok(Flow::Completed)
    }
}
