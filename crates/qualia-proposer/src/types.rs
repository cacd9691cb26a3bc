//! Proposer wire types.
//!
//! The response structs are *closed*: unknown fields are a deserialization
//! error, and required fields are enforced by the type shape rather than
//! trusted implicitly. Anything that fails here surfaces as
//! [`crate::ProposerError::InvalidResponse`] and is never retried.

use serde::{Deserialize, Serialize};

use qualia_core::{EntityId, MessageId};
use qualia_graph::MutationOp;

// ─────────────────────────────────────────────────────────────────────────────
// Request
// ─────────────────────────────────────────────────────────────────────────────

/// One pending message, flattened for the prompt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContext {
    /// Message id (echoed back in audit records).
    pub id: MessageId,
    /// Sending entity.
    pub sender: EntityId,
    /// Free-text payload.
    pub body: String,
    /// Optional monetary amount in minor units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
}

/// Request payload sent to the proposer.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalRequest {
    /// The serialized graph (see `qualia_graph::render_for_prompt`).
    pub graph: String,
    /// Pending context to integrate.
    pub messages: Vec<MessageContext>,
    /// Error text from the previous attempt, for corrective re-prompts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_error: Option<String>,
    /// Ask the proposer to also reduce graph size (compaction cycles).
    pub reduce_size: bool,
}

impl ProposalRequest {
    /// A plain integration request.
    #[must_use]
    pub fn integrate(graph: String, messages: Vec<MessageContext>) -> Self {
        Self {
            graph,
            messages,
            prior_error: None,
            reduce_size: false,
        }
    }

    /// Builder: carry the previous attempt's error text.
    #[must_use]
    pub fn with_prior_error(mut self, error: impl Into<String>) -> Self {
        self.prior_error = Some(error.into());
        self
    }

    /// Builder: request size reduction.
    #[must_use]
    pub fn compacting(mut self) -> Self {
        self.reduce_size = true;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Responses
// ─────────────────────────────────────────────────────────────────────────────

/// A proposed batch of graph edits with the proposer's reasoning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EditProposal {
    /// Free-text reasoning, persisted into the audit record.
    pub reasoning: String,
    /// The operation batch.
    pub operations: Vec<MutationOp>,
}

/// One outbound communication the proposer wants sent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OutboundMessage {
    /// Receiving entity.
    pub recipient: EntityId,
    /// Message body.
    pub body: String,
    /// Optional monetary amount in minor units.
    #[serde(default)]
    pub amount: Option<i64>,
}

/// Proposed outbound communications with reasoning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OutboundProposal {
    /// Free-text reasoning.
    pub reasoning: String,
    /// Communications to deliver.
    pub communications: Vec<OutboundMessage>,
}

/// Token-count response body.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct TokenCount {
    pub tokens: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
