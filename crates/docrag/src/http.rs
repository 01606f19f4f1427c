//! Shared HTTP plumbing for the embedding and chat adapters.

use std::time::Duration;

use anyhow::Result;
use thiserror::Error;

/// Non-success HTTP status from a provider API.
#[derive(Debug, Error)]
#[error("{provider} API error {status}: {body}")]
pub struct ApiError {
    pub provider: &'static str,
    pub status: u16,
    pub body: String,
}

impl ApiError {
    /// Rate limits and server errors are worth retrying; other 4xx are not.
    pub fn is_transient(&self) -> bool {
        self.status == 429 || (500..600).contains(&self.status)
    }
}

/// Whether an adapter error is worth retrying.
///
/// Network failures are transient; HTTP errors are classified by status;
/// anything else (bad JSON, dimension mismatch) is permanent.
pub fn is_transient(err: &anyhow::Error) -> bool {
    if let Some(api) = err.downcast_ref::<ApiError>() {
        return api.is_transient();
    }
    err.chain()
        .any(|cause| cause.downcast_ref::<reqwest::Error>().is_some())
}

pub fn client(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    Ok(builder.build()?)
}

/// Turn a non-success response into an [`ApiError`].
pub async fn check_status(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError {
        provider,
        status: status.as_u16(),
        body,
    }
    .into())
}
