//! Store error taxonomy.

use thiserror::Error;

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Failure talking to the document or presence store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A referenced record does not exist.
    #[error("{kind} \"{id}\" not found")]
    NotFound {
        /// Record kind ("entity", "version", "audit", …).
        kind: &'static str,
        /// The id that failed to resolve.
        id: String,
    },

    /// Transaction contention; safe to retry with backoff.
    #[error("transaction contention: {message}")]
    Conflict {
        /// What collided.
        message: String,
    },

    /// Transport-level failure reaching the store.
    #[error("store transport error: {message}")]
    Transport {
        /// Error description.
        message: String,
    },
}

impl StoreError {
    /// Shorthand for a missing record.
    #[must_use]
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether the caller should retry with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Transport { .. })
    }
}
