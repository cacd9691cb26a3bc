//! Integration cycle errors.
//!
//! Validation failures and cycles are *not* represented here — the
//! orchestrator consumes them internally as corrective re-prompts. What
//! surfaces is everything that ends a cycle: fatal graph corruption, an
//! exhausted retry budget, a tripped integrity guard, and failures of the
//! collaborating services.

use thiserror::Error;

use qualia_core::EntityId;
use qualia_graph::GraphError;
use qualia_lock::LockError;
use qualia_proposer::ProposerError;
use qualia_store::StoreError;

/// Failure of one integration or compaction cycle.
#[derive(Debug, Error)]
pub enum IntegrationError {
    /// Graph failure that ends the cycle (structural corruption).
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Lock manager failure, including ownership lost before commit.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Document store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Proposer transport or contract failure.
    #[error(transparent)]
    Proposer(#[from] ProposerError),

    /// The proposer kept producing invalid batches until the retry budget
    /// ran out.
    #[error("proposer gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Total proposal attempts made.
        attempts: u32,
        /// The last validation or cycle error fed back to the proposer.
        last_error: String,
    },

    /// The integrity guard rejected a catastrophic node-count drop.
    #[error(
        "integrity guard rejected proposal for \"{entity}\": \
         node count would drop from {before} to {after}"
    )]
    IntegrityGuard {
        /// The affected entity.
        entity: EntityId,
        /// Node count before the batch.
        before: usize,
        /// Node count the batch would have left.
        after: usize,
    },
}
