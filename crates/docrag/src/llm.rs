//! Streaming chat adapters.
//!
//! Both providers stream over a plain HTTP response body:
//! - **OpenAI** (`/v1/chat/completions`, `stream: true`) sends server-sent
//!   events, one `data: {json}` line per delta and a final `data: [DONE]`.
//! - **Ollama** (`/api/chat`) sends newline-delimited JSON objects, the
//!   last one carrying `"done": true`.
//!
//! The body is split into lines, each line is parsed into a [`Frame`], and
//! the frames become a [`TokenStream`]. Nothing is buffered beyond the
//! current line, so dropping the stream closes the connection.

use std::pin::Pin;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use docrag_core::llm::{LanguageModel, ModelRequest, TokenStream};
use futures::{Stream, StreamExt};

use crate::config::LlmConfig;
use crate::http;

const OPENAI_URL: &str = "https://api.openai.com/v1";
const OLLAMA_URL: &str = "http://localhost:11434";

/// One parsed line of a streamed response.
#[derive(Debug, PartialEq)]
enum Frame {
    Token(String),
    Skip,
    End,
}

fn parse_openai_line(line: &str) -> Result<Frame> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        // Blank separators, `event:` and `:` keep-alive comments.
        return Ok(Frame::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(Frame::End);
    }

    let json: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| anyhow!("Invalid OpenAI stream event: {}", e))?;
    if let Some(err) = json.get("error") {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        bail!("OpenAI stream error: {}", message);
    }

    match json
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
    {
        Some(text) if !text.is_empty() => Ok(Frame::Token(text.to_string())),
        _ => Ok(Frame::Skip),
    }
}

fn parse_ollama_line(line: &str) -> Result<Frame> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Frame::Skip);
    }

    let json: serde_json::Value =
        serde_json::from_str(line).map_err(|e| anyhow!("Invalid Ollama stream line: {}", e))?;
    if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
        bail!("Ollama stream error: {}", err);
    }
    if json.get("done").and_then(|d| d.as_bool()) == Some(true) {
        return Ok(Frame::End);
    }

    match json.pointer("/message/content").and_then(|c| c.as_str()) {
        Some(text) if !text.is_empty() => Ok(Frame::Token(text.to_string())),
        _ => Ok(Frame::Skip),
    }
}

struct LineState<S> {
    bytes: Pin<Box<S>>,
    buf: Vec<u8>,
    done: bool,
}

/// Split a byte stream into UTF-8 lines without the trailing `\n` / `\r\n`.
fn line_stream<S, B, E>(bytes: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<anyhow::Error> + Send,
{
    let state = LineState {
        bytes: Box::pin(bytes),
        buf: Vec::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(pos) = state.buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = state.buf.drain(..=pos).collect();
                return Some((decode_line(&line[..pos]), state));
            }
            if state.done {
                if state.buf.is_empty() {
                    return None;
                }
                let line = std::mem::take(&mut state.buf);
                return Some((decode_line(&line), state));
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => state.buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    state.done = true;
                    state.buf.clear();
                    return Some((Err(e.into()), state));
                }
                None => state.done = true,
            }
        }
    })
}

fn decode_line(raw: &[u8]) -> Result<String> {
    let line = std::str::from_utf8(raw).map_err(|e| anyhow!("stream is not UTF-8: {}", e))?;
    Ok(line.trim_end_matches('\r').to_string())
}

struct FrameState<L> {
    lines: Pin<Box<L>>,
    parse: fn(&str) -> Result<Frame>,
    failed: bool,
}

/// Turn parsed lines into text fragments, stopping at the end frame.
///
/// A body that closes before its end frame was cut off, so it yields an
/// error instead of ending as if the answer were complete.
fn token_stream<L>(lines: L, parse: fn(&str) -> Result<Frame>) -> TokenStream
where
    L: Stream<Item = Result<String>> + Send + 'static,
{
    let state = FrameState {
        lines: Box::pin(lines),
        parse,
        failed: false,
    };

    let frames = futures::stream::unfold(state, |mut state| async move {
        if state.failed {
            return None;
        }
        loop {
            let err = match state.lines.next().await {
                Some(Ok(line)) => match (state.parse)(&line) {
                    Ok(Frame::Token(text)) => return Some((Ok(text), state)),
                    Ok(Frame::Skip) => continue,
                    Ok(Frame::End) => return None,
                    Err(e) => e,
                },
                Some(Err(e)) => e,
                None => anyhow!("response stream closed before the completion marker"),
            };
            state.failed = true;
            return Some((Err(err), state));
        }
    });
    Box::pin(frames)
}

// ============ OpenAI ============

/// Chat completions against OpenAI or any compatible endpoint.
///
/// Requires `OPENAI_API_KEY` in the environment.
pub struct OpenAIChat {
    client: reqwest::Client,
    model: String,
    url: String,
    api_key: String,
}

impl OpenAIChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("llm.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            // No whole-request timeout: the chain bounds each step instead.
            client: http::client(None)?,
            model,
            url: config.url.clone().unwrap_or_else(|| OPENAI_URL.to_string()),
            api_key,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream(&self, request: &ModelRequest) -> Result<TokenStream> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "stream": true,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;
        let response = http::check_status("OpenAI", response).await?;

        Ok(token_stream(
            line_stream(response.bytes_stream()),
            parse_openai_line,
        ))
    }
}

// ============ Ollama ============

/// Chat against a local Ollama instance.
pub struct OllamaChat {
    client: reqwest::Client,
    model: String,
    url: String,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("llm.model required for Ollama provider"))?;
        Ok(Self {
            client: http::client(None)?,
            model,
            url: config.url.clone().unwrap_or_else(|| OLLAMA_URL.to_string()),
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream(&self, request: &ModelRequest) -> Result<TokenStream> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "stream": true,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        });

        let response = self
            .client
            .post(format!("{}/api/chat", self.url.trim_end_matches('/')))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                anyhow::Error::from(e)
                    .context(format!("Ollama connection error (is Ollama running at {}?)", self.url))
            })?;
        let response = http::check_status("Ollama", response).await?;

        Ok(token_stream(
            line_stream(response.bytes_stream()),
            parse_ollama_line,
        ))
    }
}

/// Model used when `llm.provider = "disabled"`.
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn stream(&self, _request: &ModelRequest) -> Result<TokenStream> {
        bail!("LLM provider is disabled; set [llm] provider in the config")
    }
}

pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "openai" => Ok(Arc::new(OpenAIChat::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChat::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}
