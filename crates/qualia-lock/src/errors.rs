//! Lock manager errors.
//!
//! Contention is deliberately *not* here — `acquire` returns `Ok(false)`
//! for it, because "someone else holds the lock" is a normal outcome.

use thiserror::Error;

use qualia_core::EntityId;
use qualia_store::StoreError;

/// Failure inside the lock manager.
#[derive(Debug, Error)]
pub enum LockError {
    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The lock was stolen between starting work and committing.
    ///
    /// Raised only by the verified-commit path; it means a dead-owner
    /// detector (correctly) decided this process was gone while it was in
    /// fact still working. The work's writes were not applied.
    #[error("lock ownership of entity \"{entity}\" was lost before commit")]
    OwnershipLost {
        /// The contested entity.
        entity: EntityId,
    },
}
