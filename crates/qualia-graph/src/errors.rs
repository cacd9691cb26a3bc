//! Graph mutation error types.
//!
//! The two variants drive very different recovery paths: [`GraphError::Validation`]
//! is recoverable (the orchestrator re-prompts the proposer with the error
//! text), while [`GraphError::Corruption`] means the *stored* graph was
//! already broken before this batch — fatal, surfaced to operators, never
//! retried.

use thiserror::Error;

use crate::types::MutationOp;

/// Failure applying a mutation batch.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The input graph itself had unresolved edges before any operation ran.
    #[error("stored graph is structurally corrupt: {}", details.join("; "))]
    Corruption {
        /// One line per unresolved edge found.
        details: Vec<String>,
    },

    /// The batch produced one or more validation errors.
    ///
    /// Carries every deduplicated error plus the original batch, so the
    /// caller can drive a single corrective re-prompt instead of iterating
    /// error by error.
    #[error("proposal validation failed: {}", errors.join("; "))]
    Validation {
        /// Deduplicated error messages, in first-occurrence order.
        errors: Vec<String>,
        /// The batch that produced them.
        operations: Vec<MutationOp>,
    },
}

impl GraphError {
    /// Whether the orchestrator may retry by re-prompting the proposer.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_is_retryable() {
        let err = GraphError::Validation {
            errors: vec!["bad".to_owned()],
            operations: Vec::new(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn corruption_is_fatal() {
        let err = GraphError::Corruption {
            details: vec!["n1 -> ghost".to_owned()],
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn display_joins_errors() {
        let err = GraphError::Validation {
            errors: vec!["a".to_owned(), "b".to_owned()],
            operations: Vec::new(),
        };
        assert_eq!(err.to_string(), "proposal validation failed: a; b");
    }
}
