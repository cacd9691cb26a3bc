//! Proposer client errors.

use thiserror::Error;

/// Failure talking to the generative-model collaborator.
#[derive(Debug, Error)]
pub enum ProposerError {
    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service returned a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error description from the response body.
        message: String,
        /// Whether this status is worth retrying.
        retryable: bool,
    },

    /// The response body did not match the closed proposal schema.
    #[error("invalid proposal payload: {message}")]
    InvalidResponse {
        /// What failed to validate.
        message: String,
    },
}

impl ProposerError {
    /// Whether a transport-level retry with backoff makes sense.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| {
                        s == reqwest::StatusCode::TOO_MANY_REQUESTS || s.is_server_error()
                    })
            }
            Self::Api { retryable, .. } => *retryable,
            // A malformed body will be malformed again; that is a contract
            // problem, not a transient one.
            Self::InvalidResponse { .. } => false,
        }
    }
}
