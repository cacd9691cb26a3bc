//! The [`Proposer`] trait and its HTTP implementation.
//!
//! [`HttpProposer`] wraps a JSON API with three endpoints:
//!
//! - `POST /v1/propose/edits` — graph edits for an integration cycle
//! - `POST /v1/propose/outbound` — outbound communications
//! - `POST /v1/count-tokens` — token estimate for a serialized payload
//!
//! Transport failures and retryable statuses (429, 5xx) are retried with
//! exponential backoff + jitter; schema violations are surfaced
//! immediately and never retried.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use qualia_core::retry::{backoff_delay, RetryConfig};

use crate::errors::ProposerError;
use crate::types::{EditProposal, OutboundProposal, ProposalRequest, TokenCount};

/// The generative-model collaborator boundary.
#[async_trait]
pub trait Proposer: Send + Sync {
    /// Propose a batch of graph edits for the given context.
    async fn propose_edits(&self, request: &ProposalRequest)
        -> Result<EditProposal, ProposerError>;

    /// Propose outbound communications for the given context.
    async fn propose_outbound(
        &self,
        request: &ProposalRequest,
    ) -> Result<OutboundProposal, ProposerError>;

    /// Estimate the token count of a serialized payload.
    async fn count_tokens(&self, text: &str) -> Result<u64, ProposerError>;

    /// The proposer's context budget in tokens.
    fn context_budget(&self) -> u64;
}

/// HTTP client for the proposer service.
pub struct HttpProposer {
    client: reqwest::Client,
    base_url: String,
    model: String,
    context_budget: u64,
    retry: RetryConfig,
}

impl HttpProposer {
    /// Create a client against `base_url` for `model`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, context_budget: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            context_budget,
            retry: RetryConfig::default(),
        }
    }

    /// Override the transport retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Share an existing HTTP client (connection pooling).
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ProposerError> {
        let url = format!("{}{path}", self.base_url);
        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            let retryable =
                status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            return Err(ProposerError::Api {
                status: status.as_u16(),
                message,
                retryable,
            });
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ProposerError::InvalidResponse {
            message: e.to_string(),
        })
    }

    async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ProposerError> {
        let mut payload = serde_json::to_value(body).map_err(|e| {
            ProposerError::InvalidResponse {
                message: format!("request serialization: {e}"),
            }
        })?;
        if let serde_json::Value::Object(map) = &mut payload {
            let _ = map.insert(
                "model".to_owned(),
                serde_json::Value::String(self.model.clone()),
            );
        }

        let mut attempt = 0u32;
        loop {
            match self.send_once(path, &payload).await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = backoff_delay(attempt, &self.retry, rand::random());
                    warn!(
                        path,
                        attempt,
                        delay_ms = delay,
                        error = %error,
                        "proposer call failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[async_trait]
impl Proposer for HttpProposer {
    async fn propose_edits(
        &self,
        request: &ProposalRequest,
    ) -> Result<EditProposal, ProposerError> {
        debug!(
            messages = request.messages.len(),
            has_prior_error = request.prior_error.is_some(),
            reduce_size = request.reduce_size,
            "requesting edit proposal"
        );
        self.post_json("/v1/propose/edits", request).await
    }

    async fn propose_outbound(
        &self,
        request: &ProposalRequest,
    ) -> Result<OutboundProposal, ProposerError> {
        self.post_json("/v1/propose/outbound", request).await
    }

    async fn count_tokens(&self, text: &str) -> Result<u64, ProposerError> {
        let body = serde_json::json!({ "text": text });
        let count: TokenCount = self.post_json("/v1/count-tokens", &body).await?;
        Ok(count.tokens)
    }

    fn context_budget(&self) -> u64 {
        self.context_budget
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
