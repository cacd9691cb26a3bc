//! # qualia-proposer
//!
//! Client for the generative-model collaborator.
//!
//! The model is consumed as an opaque request/response service: it
//! receives the serialized graph plus pending context (and, on retries,
//! the previous validation error) and answers with a structured proposal —
//! either graph edit operations or outbound communications, depending on
//! the call site. It also exposes a token-count estimate against the same
//! serialized payload, which [`SizeEstimator`] caches per graph version.
//!
//! Responses are untrusted dynamic data; every payload is validated at the
//! deserialization boundary with closed structs.

#![deny(unsafe_code)]

pub mod client;
pub mod errors;
pub mod estimate;
pub mod types;

pub use client::{HttpProposer, Proposer};
pub use errors::ProposerError;
pub use estimate::SizeEstimator;
pub use types::{EditProposal, MessageContext, OutboundMessage, OutboundProposal, ProposalRequest};
