//! The lock manager.
//!
//! Acquisition algorithm:
//!
//! 1. Write the liveness key for this process's owner id *before* touching
//!    the authoritative lock, so any later reader of the lock can verify
//!    liveness immediately.
//! 2. Probe the entity record and the recorded holder's liveness outside
//!    the transaction, then run the transaction: take the lock iff no
//!    expiry is set, the expiry passed by more than the safety margin, or
//!    the probed holder is provably dead. A holder that changed between
//!    probe and transaction counts as contention.
//! 3. An optional precondition on the entity record can veto acquisition
//!    regardless of lock state.
//! 4. Release transactionally clears the fields and revokes presence; the
//!    exclusive runner releases on the error path too, before the error
//!    propagates.
//!
//! Every write guarded by the lock must go through
//! [`LockManager::commit_verified`], which re-checks ownership inside the
//! same transaction as the writes. Skipping it allows a dead-owner
//! detector to steal the lock between the start of work and its commit,
//! producing two writers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use qualia_core::{EntityId, VersionId};
use qualia_store::{
    CommitOutcome, CommitRequest, DocumentStore, EntityRecord, PresenceGuard, PresenceStore,
    TxVerdict,
};

use crate::errors::LockError;
use crate::identity::ProcessIdentity;

/// Default margin past expiry before an expired lock may be taken.
///
/// Covers clock skew between workers; the presence check handles crashed
/// holders long before this triggers.
pub const DEFAULT_STEAL_SAFETY_MARGIN_SECS: i64 = 30;

/// How often `wait_for_release` re-probes holder liveness between
/// document-change notifications.
const LIVENESS_POLL_INTERVAL: StdDuration = StdDuration::from_millis(250);

/// Acquisition precondition over the entity's current state.
///
/// Lets callers make acquisition conditional on business state, e.g.
/// "only if these messages are still unintegrated".
pub type Precondition = Box<dyn FnOnce(&EntityRecord) -> bool + Send>;

/// Mutual exclusion for one entity at a time.
pub struct LockManager {
    documents: Arc<dyn DocumentStore>,
    presence: Arc<dyn PresenceStore>,
    identity: ProcessIdentity,
    steal_margin: Duration,
    /// Presence guards for locks currently held by this process.
    held: Mutex<HashMap<EntityId, PresenceGuard>>,
}

impl LockManager {
    /// Create a manager locking under the given identity.
    #[must_use]
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        presence: Arc<dyn PresenceStore>,
        identity: ProcessIdentity,
    ) -> Self {
        Self {
            documents,
            presence,
            identity,
            steal_margin: Duration::seconds(DEFAULT_STEAL_SAFETY_MARGIN_SECS),
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Override the steal safety margin.
    #[must_use]
    pub fn with_steal_margin(mut self, margin: Duration) -> Self {
        self.steal_margin = margin;
        self
    }

    /// The identity this manager locks under.
    #[must_use]
    pub fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }

    /// Try to take the entity's lock for `duration`.
    ///
    /// Returns `Ok(false)` when someone else holds it — a normal outcome,
    /// not an error.
    pub async fn acquire(
        &self,
        entity: &EntityId,
        duration: Duration,
        precondition: Option<Precondition>,
    ) -> Result<bool, LockError> {
        // Liveness first: from this point on, any reader that sees our
        // owner id on the record can immediately verify we are alive.
        let guard = self
            .presence
            .announce(entity, self.identity.owner())
            .await?;

        let snapshot = self.documents.entity(entity).await?;
        let probed_owner = snapshot.lock_owner.clone();
        let holder_live = match &probed_owner {
            Some(owner) if snapshot.lock_expiry.is_some() => {
                self.presence.is_live(entity, owner).await?
            }
            _ => false,
        };

        let me = self.identity.owner().clone();
        let margin = self.steal_margin;
        let acquired = self
            .documents
            .update_entity(
                entity,
                Box::new(move |record| {
                    if let Some(precondition) = precondition {
                        if !precondition(record) {
                            return TxVerdict::Abort;
                        }
                    }

                    let now = Utc::now();
                    let takeable = match &record.lock_expiry {
                        None => true,
                        Some(expiry) if *expiry + margin < now => true,
                        Some(_) => {
                            // Dead-owner stealing: only valid if the holder
                            // we probed is still the recorded one.
                            record.lock_owner == probed_owner && !holder_live
                        }
                    };
                    if !takeable {
                        return TxVerdict::Abort;
                    }

                    record.lock_expiry = Some(now + duration);
                    record.lock_owner = Some(me);
                    TxVerdict::Commit
                }),
            )
            .await?;

        if acquired {
            debug!(entity = %entity, owner = %self.identity.owner(), "lock acquired");
            // Keep presence alive for the duration of the hold; replacing a
            // stale guard revokes it via drop.
            let _ = self.held.lock().insert(entity.clone(), guard);
        } else {
            debug!(entity = %entity, "lock contended");
            guard.revoke();
        }
        Ok(acquired)
    }

    /// Clear the lock fields and revoke presence.
    ///
    /// A lock that was stolen in the meantime is left alone — the thief
    /// owns the record now.
    pub async fn release(&self, entity: &EntityId) -> Result<(), LockError> {
        let me = self.identity.owner().clone();
        let cleared = self
            .documents
            .update_entity(
                entity,
                Box::new(move |record| {
                    if record.lock_owner.as_ref() == Some(&me) {
                        record.clear_lock();
                        TxVerdict::Commit
                    } else {
                        TxVerdict::Abort
                    }
                }),
            )
            .await?;

        if !cleared {
            warn!(entity = %entity, "release found lock no longer ours");
        }
        if let Some(guard) = self.held.lock().remove(entity) {
            guard.revoke();
        }
        Ok(())
    }

    /// Acquire, run `work`, release — releasing on the error path too.
    ///
    /// Returns `Ok(None)` when the lock was contended and `work` never ran.
    pub async fn run_exclusive<T, F, Fut>(
        &self,
        entity: &EntityId,
        duration: Duration,
        precondition: Option<Precondition>,
        work: F,
    ) -> Result<Option<T>, LockError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = T> + Send,
    {
        if !self.acquire(entity, duration, precondition).await? {
            return Ok(None);
        }
        let result = work().await;
        // Work errors travel inside T; the release below runs before the
        // caller ever sees them.
        self.release(entity).await?;
        Ok(Some(result))
    }

    /// Wait until the entity's lock is released, its holder dies, or
    /// `timeout` elapses. Returns `true` if the lock is free.
    ///
    /// Dropping the returned future unsubscribes the underlying watch.
    pub async fn wait_for_release(
        &self,
        entity: &EntityId,
        timeout: StdDuration,
    ) -> Result<bool, LockError> {
        let mut updates = self.documents.watch_entity(entity).await?;

        let wait = async {
            loop {
                let (expiry, owner) = {
                    let record = updates.borrow();
                    (record.lock_expiry, record.lock_owner.clone())
                };
                let free = match (expiry, owner) {
                    (None, _) | (Some(_), None) => true,
                    (Some(_), Some(owner)) => !self.presence.is_live(entity, &owner).await?,
                };
                if free {
                    return Ok::<bool, LockError>(true);
                }

                // Liveness can vanish without a document write, so poll it
                // alongside the change stream.
                tokio::select! {
                    changed = updates.changed() => {
                        if changed.is_err() {
                            return Ok(false);
                        }
                    }
                    () = tokio::time::sleep(LIVENESS_POLL_INTERVAL) => {}
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_elapsed) => Ok(false),
        }
    }

    /// Commit integration writes with lock verification.
    ///
    /// Re-checks that this process still owns the lock *inside* the same
    /// transaction as the writes. On a stolen lock nothing is written and
    /// [`LockError::OwnershipLost`] is returned.
    pub async fn commit_verified(
        &self,
        request: CommitRequest,
    ) -> Result<VersionId, LockError> {
        let me = self.identity.owner().clone();
        let entity = request.entity.clone();
        let outcome = self
            .documents
            .commit_integration(
                request,
                Box::new(move |record| record.lock_owner.as_ref() == Some(&me)),
            )
            .await?;

        match outcome {
            CommitOutcome::Committed(version) => {
                info!(entity = %entity, version = %version, "verified commit applied");
                Ok(version)
            }
            CommitOutcome::Rejected => {
                warn!(entity = %entity, "verified commit rejected: lock stolen");
                Err(LockError::OwnershipLost { entity })
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use qualia_graph::Graph;
    use qualia_store::{GraphVersionRecord, MemoryDocumentStore, MemoryPresence};

    fn entity() -> EntityId {
        EntityId::from("e1")
    }

    struct Rig {
        documents: Arc<MemoryDocumentStore>,
        presence: MemoryPresence,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                documents: Arc::new(MemoryDocumentStore::new()),
                presence: MemoryPresence::new(),
            }
        }

        fn manager(&self, owner: &str) -> LockManager {
            LockManager::new(
                Arc::clone(&self.documents) as Arc<dyn DocumentStore>,
                Arc::new(self.presence.clone()) as Arc<dyn PresenceStore>,
                ProcessIdentity::fixed(owner),
            )
        }
    }

    #[tokio::test]
    async fn acquire_release_round_trip() {
        let rig = Rig::new();
        let manager = rig.manager("worker-a");

        assert!(manager
            .acquire(&entity(), Duration::seconds(60), None)
            .await
            .unwrap());
        let record = rig.documents.entity(&entity()).await.unwrap();
        assert!(record.lock_expiry.is_some());
        assert_eq!(record.lock_owner.as_ref().unwrap().as_str(), "worker-a");

        manager.release(&entity()).await.unwrap();
        let record = rig.documents.entity(&entity()).await.unwrap();
        assert!(record.lock_expiry.is_none());
        assert!(record.lock_owner.is_none());
        assert!(!rig
            .presence
            .is_live(&entity(), manager.identity().owner())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn second_acquirer_is_contended() {
        let rig = Rig::new();
        let a = rig.manager("worker-a");
        let b = rig.manager("worker-b");

        assert!(a.acquire(&entity(), Duration::seconds(60), None).await.unwrap());
        assert!(!b.acquire(&entity(), Duration::seconds(60), None).await.unwrap());

        // The loser's presence key must not linger.
        assert!(!rig
            .presence
            .is_live(&entity(), b.identity().owner())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn dead_owner_is_stolen() {
        let rig = Rig::new();
        let a = rig.manager("worker-a");
        let b = rig.manager("worker-b");

        assert!(a.acquire(&entity(), Duration::seconds(60), None).await.unwrap());
        // Simulate a crash: the presence key disappears, the record keeps
        // its lock fields.
        rig.presence.sever(&entity(), a.identity().owner());

        assert!(b.acquire(&entity(), Duration::seconds(60), None).await.unwrap());
        let record = rig.documents.entity(&entity()).await.unwrap();
        assert_eq!(record.lock_owner.as_ref().unwrap().as_str(), "worker-b");
    }

    #[tokio::test]
    async fn expired_lock_is_stolen_past_margin() {
        let rig = Rig::new();
        let b = rig.manager("worker-b");

        // A live-looking holder with an expiry far in the past.
        let _stale_guard = rig
            .presence
            .announce(&entity(), &qualia_core::OwnerId::from("worker-a"))
            .await
            .unwrap();
        let _ = rig
            .documents
            .update_entity(
                &entity(),
                Box::new(|record| {
                    record.lock_expiry = Some(Utc::now() - Duration::seconds(120));
                    record.lock_owner = Some(qualia_core::OwnerId::from("worker-a"));
                    TxVerdict::Commit
                }),
            )
            .await
            .unwrap();

        assert!(b.acquire(&entity(), Duration::seconds(60), None).await.unwrap());
    }

    #[tokio::test]
    async fn live_unexpired_holder_is_not_stolen() {
        let rig = Rig::new();
        let a = rig.manager("worker-a");
        let b = rig.manager("worker-b");

        assert!(a.acquire(&entity(), Duration::seconds(600), None).await.unwrap());
        assert!(!b.acquire(&entity(), Duration::seconds(60), None).await.unwrap());
    }

    #[tokio::test]
    async fn precondition_vetoes_acquisition() {
        let rig = Rig::new();
        let manager = rig.manager("worker-a");

        let acquired = manager
            .acquire(
                &entity(),
                Duration::seconds(60),
                Some(Box::new(|record| record.balance > 0)),
            )
            .await
            .unwrap();
        assert!(!acquired);
        assert!(!rig.documents.entity(&entity()).await.unwrap().has_lock());
    }

    #[tokio::test]
    async fn run_exclusive_none_on_contention() {
        let rig = Rig::new();
        let a = rig.manager("worker-a");
        let b = rig.manager("worker-b");

        assert!(a.acquire(&entity(), Duration::seconds(60), None).await.unwrap());
        let ran = b
            .run_exclusive(&entity(), Duration::seconds(60), None, || async { 42 })
            .await
            .unwrap();
        assert_eq!(ran, None);
    }

    #[tokio::test]
    async fn run_exclusive_releases_after_work() {
        let rig = Rig::new();
        let manager = rig.manager("worker-a");

        let result = manager
            .run_exclusive(&entity(), Duration::seconds(60), None, || async { "done" })
            .await
            .unwrap();
        assert_eq!(result, Some("done"));
        assert!(!rig.documents.entity(&entity()).await.unwrap().has_lock());
    }

    #[tokio::test]
    async fn run_exclusive_releases_when_work_errors() {
        let rig = Rig::new();
        let manager = rig.manager("worker-a");

        let result: Option<Result<(), &str>> = manager
            .run_exclusive(&entity(), Duration::seconds(60), None, || async {
                Err("boom")
            })
            .await
            .unwrap();
        assert_eq!(result, Some(Err("boom")));
        assert!(!rig.documents.entity(&entity()).await.unwrap().has_lock());
    }

    #[tokio::test]
    async fn wait_for_release_resolves_on_release() {
        let rig = Rig::new();
        let a = rig.manager("worker-a");

        assert!(a.acquire(&entity(), Duration::seconds(60), None).await.unwrap());

        let waiter = tokio::spawn({
            let docs = Arc::clone(&rig.documents) as Arc<dyn DocumentStore>;
            let presence = Arc::new(rig.presence.clone()) as Arc<dyn PresenceStore>;
            async move {
                let b = LockManager::new(docs, presence, ProcessIdentity::fixed("worker-b"));
                b.wait_for_release(&EntityId::from("e1"), StdDuration::from_secs(5))
                    .await
            }
        });

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        a.release(&entity()).await.unwrap();

        assert!(waiter.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn wait_for_release_times_out() {
        let rig = Rig::new();
        let a = rig.manager("worker-a");
        let b = rig.manager("worker-b");

        assert!(a.acquire(&entity(), Duration::seconds(600), None).await.unwrap());
        let freed = b
            .wait_for_release(&entity(), StdDuration::from_millis(100))
            .await
            .unwrap();
        assert!(!freed);
    }

    #[tokio::test]
    async fn wait_for_release_resolves_when_holder_dies() {
        let rig = Rig::new();
        let a = rig.manager("worker-a");
        let b = rig.manager("worker-b");

        assert!(a.acquire(&entity(), Duration::seconds(600), None).await.unwrap());
        rig.presence.sever(&entity(), a.identity().owner());

        let freed = b
            .wait_for_release(&entity(), StdDuration::from_secs(5))
            .await
            .unwrap();
        assert!(freed);
    }

    #[tokio::test]
    async fn commit_verified_succeeds_for_holder() {
        let rig = Rig::new();
        let manager = rig.manager("worker-a");

        assert!(manager
            .acquire(&entity(), Duration::seconds(60), None)
            .await
            .unwrap());
        let version = GraphVersionRecord::new(entity(), Graph::empty(entity()));
        let version_id = version.id.clone();
        let committed = manager
            .commit_verified(CommitRequest {
                entity: entity(),
                version,
                ack_messages: Vec::new(),
                finalize_audits: Vec::new(),
            })
            .await
            .unwrap();
        assert_eq!(committed, version_id);
    }

    #[tokio::test]
    async fn commit_verified_fails_when_stolen() {
        let rig = Rig::new();
        let a = rig.manager("worker-a");
        let b = rig.manager("worker-b");

        assert!(a.acquire(&entity(), Duration::seconds(60), None).await.unwrap());
        // B steals after A's "crash".
        rig.presence.sever(&entity(), a.identity().owner());
        assert!(b.acquire(&entity(), Duration::seconds(60), None).await.unwrap());

        let version = GraphVersionRecord::new(entity(), Graph::empty(entity()));
        let err = a
            .commit_verified(CommitRequest {
                entity: entity(),
                version,
                ack_messages: Vec::new(),
                finalize_audits: Vec::new(),
            })
            .await
            .unwrap_err();
        assert_matches!(err, LockError::OwnershipLost { .. });

        // Nothing of A's attempt landed.
        let record = rig.documents.entity(&entity()).await.unwrap();
        assert!(record.current_version.is_none());
    }
}
