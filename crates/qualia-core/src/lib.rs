//! # qualia-core
//!
//! Foundation types shared by every qualia crate.
//!
//! - **Branded IDs**: `EntityId`, `VersionId`, `NodeId`, `MessageId`,
//!   `AuditId`, `OwnerId` as newtypes for type safety
//! - **Retry math**: `RetryConfig` and the portable backoff calculation
//!   used by the proposer client and the orchestrator
//! - **Tracing**: `init_tracing` installing the process-wide subscriber

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;
pub mod retry;

pub use ids::{AuditId, EntityId, MessageId, NodeId, OwnerId, VersionId};
pub use retry::{backoff_delay, RetryConfig};
