//! # qualia-graph
//!
//! The knowledge-graph data model and the pure mutation engine.
//!
//! A [`Graph`] maps node ids to [`Node`]s; each node carries a conclusion
//! and a set of assumption edges to the nodes it depends on. [`apply`]
//! validates and applies a whole batch of [`MutationOp`]s at once — it
//! never partially applies a batch and never mutates its input.
//!
//! Everything in this crate is synchronous and side-effect free; the
//! orchestration, persistence, and proposer plumbing live elsewhere.

#![deny(unsafe_code)]

pub mod apply;
pub mod cycles;
pub mod errors;
pub mod prompt;
pub mod types;

pub use apply::apply;
pub use cycles::detect_cycles;
pub use errors::GraphError;
pub use prompt::{flatten_for_prompt, render_for_prompt};
pub use types::{Graph, MutationOp, Node};
