//! # qualia-store
//!
//! The storage boundary of the qualia engine.
//!
//! The production document store and presence service are external
//! collaborators; this crate owns their interface traits plus the record
//! schemas that cross them, and ships in-process implementations
//! ([`MemoryDocumentStore`], [`MemoryPresence`]) used by tests and local
//! runs.
//!
//! Atomicity contract: [`DocumentStore::update_entity`] and
//! [`DocumentStore::commit_integration`] are transactions — callers never
//! observe partial state from either.

#![deny(unsafe_code)]

pub mod errors;
pub mod memory;
pub mod records;
pub mod traits;

pub use errors::{Result, StoreError};
pub use memory::{MemoryDocumentStore, MemoryPresence};
pub use records::{AuditRecord, EntityRecord, GraphVersionRecord, PendingMessageRecord};
pub use traits::{
    reconcile_chain, CommitOutcome, CommitRequest, DocumentStore, PresenceGuard, PresenceStore,
    TxVerdict,
};
