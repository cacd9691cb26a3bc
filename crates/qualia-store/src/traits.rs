//! Storage boundary traits.
//!
//! [`DocumentStore`] models the transactional document service: per-record
//! atomic read-modify-write, one multi-write integration commit, and
//! change-notification subscriptions. [`PresenceStore`] models the
//! ephemeral liveness service ("write, and auto-delete this key when the
//! writer disconnects"). Both are object-safe so components hold
//! `Arc<dyn …>` and tests inject fakes.

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::warn;

use qualia_core::{AuditId, EntityId, MessageId, OwnerId, VersionId};

use crate::errors::Result;
use crate::records::{AuditRecord, EntityRecord, GraphVersionRecord, PendingMessageRecord};

// ─────────────────────────────────────────────────────────────────────────────
// Transaction vocabulary
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome a transaction closure hands back to the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxVerdict {
    /// Persist the mutated record.
    Commit,
    /// Discard all changes made by the closure.
    Abort,
}

/// Boxed entity-record transaction body.
pub type EntityTx = Box<dyn FnOnce(&mut EntityRecord) -> TxVerdict + Send>;

/// Commit-time guard evaluated against the entity record *inside* the
/// same transaction as the writes it protects.
pub type CommitGuard = Box<dyn FnOnce(&EntityRecord) -> bool + Send>;

/// The one multi-document write of the system: a new graph version, the
/// pointer advance, message acknowledgements, and audit stamps, all or
/// nothing.
#[derive(Clone, Debug)]
pub struct CommitRequest {
    /// Entity being integrated.
    pub entity: EntityId,
    /// The new graph version to append.
    pub version: GraphVersionRecord,
    /// Messages to mark acknowledged.
    pub ack_messages: Vec<MessageId>,
    /// Audit records to stamp with the new version id.
    pub finalize_audits: Vec<AuditId>,
}

/// Result of [`DocumentStore::commit_integration`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Everything was written; carries the new version id.
    Committed(VersionId),
    /// The guard rejected; nothing was written.
    Rejected,
}

// ─────────────────────────────────────────────────────────────────────────────
// DocumentStore
// ─────────────────────────────────────────────────────────────────────────────

/// Transactional document service boundary.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read the entity record, creating it on first reference.
    async fn entity(&self, id: &EntityId) -> Result<EntityRecord>;

    /// Atomic read-modify-write on one entity record.
    ///
    /// Returns `true` if the closure committed, `false` if it aborted.
    async fn update_entity(&self, id: &EntityId, tx: EntityTx) -> Result<bool>;

    /// Append a graph version (append-only).
    async fn insert_version(&self, version: GraphVersionRecord) -> Result<()>;

    /// Fetch a graph version by id.
    async fn version(&self, id: &VersionId) -> Result<GraphVersionRecord>;

    /// All versions belonging to an entity, oldest first.
    async fn versions_for_entity(&self, entity: &EntityId) -> Result<Vec<GraphVersionRecord>>;

    /// Point `prev`'s forward pointer at `next` (secondary index upkeep).
    async fn set_next_version(&self, prev: &VersionId, next: &VersionId) -> Result<()>;

    /// Append a pending message (append-only log, no lock required).
    async fn append_message(&self, message: PendingMessageRecord) -> Result<()>;

    /// All unacknowledged messages for an entity whose delivery time has
    /// passed, oldest first.
    async fn unacknowledged_messages(&self, entity: &EntityId)
        -> Result<Vec<PendingMessageRecord>>;

    /// Append an audit record (append-only log, no lock required).
    async fn append_audit(&self, audit: AuditRecord) -> Result<()>;

    /// Fetch an audit record.
    async fn audit(&self, id: &AuditId) -> Result<AuditRecord>;

    /// All audit records for an entity, oldest first (forensics).
    async fn audits_for_entity(&self, entity: &EntityId) -> Result<Vec<AuditRecord>>;

    /// Annotate an audit record with an error description.
    async fn annotate_audit(&self, id: &AuditId, error: &str) -> Result<()>;

    /// The integration commit: runs `guard` against the current entity
    /// record and, only if it accepts, writes the version, advances
    /// `current_version`, links the superseded version's forward pointer,
    /// acks messages (crediting their monetary amounts onto the entity's
    /// balance), and stamps audits — atomically.
    async fn commit_integration(
        &self,
        request: CommitRequest,
        guard: CommitGuard,
    ) -> Result<CommitOutcome>;

    /// Subscribe to entity-record changes.
    ///
    /// The receiver holds the latest record; dropping it unsubscribes.
    async fn watch_entity(&self, id: &EntityId) -> Result<watch::Receiver<EntityRecord>>;

    /// Subscribe to message arrivals for an entity.
    ///
    /// The value is a monotonic arrival counter; a change means "new
    /// messages may be waiting", after which callers re-query
    /// [`DocumentStore::unacknowledged_messages`].
    async fn watch_messages(&self, id: &EntityId) -> Result<watch::Receiver<u64>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// PresenceStore
// ─────────────────────────────────────────────────────────────────────────────

/// Releases a presence key when dropped (the in-process stand-in for
/// "auto-delete on disconnect").
///
/// Call [`PresenceGuard::revoke`] for a clean release; a plain drop covers
/// the crash path.
pub struct PresenceGuard {
    revoke: Option<Box<dyn FnOnce() + Send>>,
}

impl PresenceGuard {
    /// Wrap a revocation action.
    #[must_use]
    pub fn new(revoke: impl FnOnce() + Send + 'static) -> Self {
        Self {
            revoke: Some(Box::new(revoke)),
        }
    }

    /// Cleanly release the key and cancel the on-disconnect registration.
    pub fn revoke(mut self) {
        if let Some(revoke) = self.revoke.take() {
            revoke();
        }
    }
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        if let Some(revoke) = self.revoke.take() {
            revoke();
        }
    }
}

impl std::fmt::Debug for PresenceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceGuard")
            .field("armed", &self.revoke.is_some())
            .finish()
    }
}

/// Ephemeral liveness service boundary.
///
/// Keys are scoped `locks/{entity}/{owner}`. Used only for liveness —
/// never for the authoritative lock state.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Write the liveness key and register its auto-delete-on-disconnect.
    async fn announce(&self, entity: &EntityId, owner: &OwnerId) -> Result<PresenceGuard>;

    /// Whether the owner's liveness key is currently present.
    async fn is_live(&self, entity: &EntityId, owner: &OwnerId) -> Result<bool>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Chain reconciliation
// ─────────────────────────────────────────────────────────────────────────────

/// Lazily repair an entity's `next_version` chain.
///
/// The chain is a recovery/audit aid, never the primary lookup path; the
/// entity record's `current_version` pointer stays the only ground truth.
/// Walks the versions oldest-first and points each at its successor,
/// returning how many links were repaired.
pub async fn reconcile_chain(store: &dyn DocumentStore, entity: &EntityId) -> Result<u32> {
    let versions = store.versions_for_entity(entity).await?;
    let mut repaired = 0u32;

    for pair in versions.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if prev.next_version.as_ref() != Some(&next.id) {
            warn!(
                entity = %entity,
                version = %prev.id,
                expected = %next.id,
                "repairing inconsistent version chain link"
            );
            store.set_next_version(&prev.id, &next.id).await?;
            repaired += 1;
        }
    }

    Ok(repaired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn guard_revokes_on_drop() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&released);
        {
            let _guard = PresenceGuard::new(move || flag.store(true, Ordering::SeqCst));
        }
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn guard_revokes_once() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&released);
        let guard = PresenceGuard::new(move || {
            assert!(!flag.swap(true, Ordering::SeqCst), "double revoke");
        });
        guard.revoke();
        assert!(released.load(Ordering::SeqCst));
    }
}
