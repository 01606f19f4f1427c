//! Exponential backoff for transient provider failures.
//!
//! Adapters make one attempt per call. Ingestion wraps its embedder in a
//! [`RetryingEmbedder`]; interactive queries are bounded by the chain's
//! timeouts instead and never retry.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use docrag_core::embedding::Embedder;

use crate::http;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    /// 1s, 2s, 4s, ... capped at 32s.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails permanently, or retries run out.
pub async fn with_backoff<T, F, Fut>(policy: BackoffPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries && http::is_transient(&e) => {
                attempt += 1;
                let delay = policy.delay(attempt);
                tracing::warn!(
                    what,
                    attempt,
                    max = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// [`Embedder`] that retries transient failures of the wrapped embedder.
pub struct RetryingEmbedder {
    inner: Arc<dyn Embedder>,
    policy: BackoffPolicy,
}

impl RetryingEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, policy: BackoffPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl Embedder for RetryingEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        with_backoff(self.policy, "embed", || self.inner.embed(text)).await
    }
}
