//! Language model trait.
//!
//! A [`LanguageModel`] turns a [`ModelRequest`] into a lazy stream of text
//! fragments. The chain pulls fragments one at a time, so dropping the
//! stream is enough to stop an in-flight generation. Concrete chat
//! backends (OpenAI, Ollama) live in the `docrag` app crate.

use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;

/// Stream of generated text fragments.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Start a streamed completion. Implementations must not retry.
    async fn stream(&self, request: &ModelRequest) -> Result<TokenStream>;
}
