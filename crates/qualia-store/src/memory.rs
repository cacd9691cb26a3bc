//! In-memory store implementations.
//!
//! Process-local stand-ins for the external document and presence
//! services, with the same atomicity contract: every method that writes
//! takes the state mutex once, so concurrent tasks always observe either
//! all of a transaction or none of it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::trace;

use qualia_core::{AuditId, EntityId, MessageId, OwnerId, VersionId};

use crate::errors::{Result, StoreError};
use crate::records::{AuditRecord, EntityRecord, GraphVersionRecord, PendingMessageRecord};
use crate::traits::{
    CommitGuard, CommitOutcome, CommitRequest, DocumentStore, EntityTx, PresenceGuard,
    PresenceStore, TxVerdict,
};

// ─────────────────────────────────────────────────────────────────────────────
// MemoryDocumentStore
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct StoreState {
    entities: HashMap<EntityId, EntityRecord>,
    versions: HashMap<VersionId, GraphVersionRecord>,
    messages: Vec<PendingMessageRecord>,
    audits: HashMap<AuditId, AuditRecord>,
    entity_watch: HashMap<EntityId, watch::Sender<EntityRecord>>,
    message_watch: HashMap<EntityId, watch::Sender<u64>>,
}

impl StoreState {
    fn entity_mut(&mut self, id: &EntityId) -> &mut EntityRecord {
        self.entities
            .entry(id.clone())
            .or_insert_with(|| EntityRecord::new(id.clone()))
    }

    fn notify_entity(&mut self, id: &EntityId) {
        let record = self.entity_mut(id).clone();
        if let Some(sender) = self.entity_watch.get(id) {
            let _ = sender.send_replace(record);
        }
    }

    fn notify_messages(&mut self, id: &EntityId) {
        if let Some(sender) = self.message_watch.get(id) {
            sender.send_modify(|count| *count += 1);
        }
    }
}

/// In-process [`DocumentStore`].
#[derive(Default)]
pub struct MemoryDocumentStore {
    state: Mutex<StoreState>,
}

impl MemoryDocumentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn entity(&self, id: &EntityId) -> Result<EntityRecord> {
        let mut state = self.state.lock();
        Ok(state.entity_mut(id).clone())
    }

    async fn update_entity(&self, id: &EntityId, tx: EntityTx) -> Result<bool> {
        let mut state = self.state.lock();
        let current = state.entity_mut(id);
        let mut draft = current.clone();
        match tx(&mut draft) {
            TxVerdict::Commit => {
                *current = draft;
                state.notify_entity(id);
                Ok(true)
            }
            TxVerdict::Abort => Ok(false),
        }
    }

    async fn insert_version(&self, version: GraphVersionRecord) -> Result<()> {
        let mut state = self.state.lock();
        let _ = state.versions.insert(version.id.clone(), version);
        Ok(())
    }

    async fn version(&self, id: &VersionId) -> Result<GraphVersionRecord> {
        let state = self.state.lock();
        state
            .versions
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("version", id.as_str()))
    }

    async fn versions_for_entity(&self, entity: &EntityId) -> Result<Vec<GraphVersionRecord>> {
        let state = self.state.lock();
        let mut versions: Vec<GraphVersionRecord> = state
            .versions
            .values()
            .filter(|v| &v.entity == entity)
            .cloned()
            .collect();
        versions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(versions)
    }

    async fn set_next_version(&self, prev: &VersionId, next: &VersionId) -> Result<()> {
        let mut state = self.state.lock();
        let version = state
            .versions
            .get_mut(prev)
            .ok_or_else(|| StoreError::not_found("version", prev.as_str()))?;
        version.next_version = Some(next.clone());
        Ok(())
    }

    async fn append_message(&self, message: PendingMessageRecord) -> Result<()> {
        let mut state = self.state.lock();
        let recipient = message.recipient.clone();
        state.messages.push(message);
        state.notify_messages(&recipient);
        Ok(())
    }

    async fn unacknowledged_messages(
        &self,
        entity: &EntityId,
    ) -> Result<Vec<PendingMessageRecord>> {
        let state = self.state.lock();
        let now = Utc::now();
        let mut pending: Vec<PendingMessageRecord> = state
            .messages
            .iter()
            .filter(|m| &m.recipient == entity && !m.acknowledged && m.deliver_at <= now)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.deliver_at.cmp(&b.deliver_at).then_with(|| a.id.cmp(&b.id)));
        Ok(pending)
    }

    async fn append_audit(&self, audit: AuditRecord) -> Result<()> {
        let mut state = self.state.lock();
        let _ = state.audits.insert(audit.id.clone(), audit);
        Ok(())
    }

    async fn audit(&self, id: &AuditId) -> Result<AuditRecord> {
        let state = self.state.lock();
        state
            .audits
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("audit", id.as_str()))
    }

    async fn audits_for_entity(&self, entity: &EntityId) -> Result<Vec<AuditRecord>> {
        let state = self.state.lock();
        let mut audits: Vec<AuditRecord> = state
            .audits
            .values()
            .filter(|a| &a.entity == entity)
            .cloned()
            .collect();
        audits.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(audits)
    }

    async fn annotate_audit(&self, id: &AuditId, error: &str) -> Result<()> {
        let mut state = self.state.lock();
        let audit = state
            .audits
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("audit", id.as_str()))?;
        audit.error = Some(error.to_owned());
        Ok(())
    }

    async fn commit_integration(
        &self,
        request: CommitRequest,
        guard: CommitGuard,
    ) -> Result<CommitOutcome> {
        let mut state = self.state.lock();

        // Everything below happens under one mutex hold: the guard sees
        // exactly the record the writes will apply against.
        let record = state.entity_mut(&request.entity).clone();
        if !guard(&record) {
            trace!(entity = %request.entity, "integration commit rejected by guard");
            return Ok(CommitOutcome::Rejected);
        }

        for message_id in &request.ack_messages {
            if !state.messages.iter().any(|m| &m.id == message_id) {
                return Err(StoreError::not_found("message", message_id.as_str()));
            }
        }
        for audit_id in &request.finalize_audits {
            if !state.audits.contains_key(audit_id) {
                return Err(StoreError::not_found("audit", audit_id.as_str()));
            }
        }

        let new_id = request.version.id.clone();
        let prior = record.current_version.clone();

        let _ = state.versions.insert(new_id.clone(), request.version);
        if let Some(prior_id) = &prior {
            if let Some(prior_version) = state.versions.get_mut(prior_id) {
                prior_version.next_version = Some(new_id.clone());
            }
        }

        // Acks also settle any monetary amounts onto the recipient's
        // balance; the already-acknowledged check keeps this idempotent.
        let mut credited = 0i64;
        for message in &mut state.messages {
            if request.ack_messages.contains(&message.id) && !message.acknowledged {
                message.acknowledged = true;
                credited += message.amount.unwrap_or(0);
            }
        }

        let entity = state.entity_mut(&request.entity);
        entity.current_version = Some(new_id.clone());
        entity.balance += credited;
        for audit_id in &request.finalize_audits {
            if let Some(audit) = state.audits.get_mut(audit_id) {
                audit.result_version = Some(new_id.clone());
            }
        }

        state.notify_entity(&request.entity);
        trace!(entity = %request.entity, version = %new_id, "integration committed");
        Ok(CommitOutcome::Committed(new_id))
    }

    async fn watch_entity(&self, id: &EntityId) -> Result<watch::Receiver<EntityRecord>> {
        let mut state = self.state.lock();
        let initial = state.entity_mut(id).clone();
        let sender = state
            .entity_watch
            .entry(id.clone())
            .or_insert_with(|| watch::channel(initial).0);
        Ok(sender.subscribe())
    }

    async fn watch_messages(&self, id: &EntityId) -> Result<watch::Receiver<u64>> {
        let mut state = self.state.lock();
        let sender = state
            .message_watch
            .entry(id.clone())
            .or_insert_with(|| watch::channel(0).0);
        Ok(sender.subscribe())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryPresence
// ─────────────────────────────────────────────────────────────────────────────

/// In-process [`PresenceStore`] backed by a concurrent key set.
#[derive(Clone, Default)]
pub struct MemoryPresence {
    keys: Arc<DashMap<(EntityId, OwnerId), ()>>,
}

impl MemoryPresence {
    /// Create an empty presence store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a crashed writer: drop the key without a guard.
    pub fn sever(&self, entity: &EntityId, owner: &OwnerId) {
        let _ = self.keys.remove(&(entity.clone(), owner.clone()));
    }
}

#[async_trait]
impl PresenceStore for MemoryPresence {
    async fn announce(&self, entity: &EntityId, owner: &OwnerId) -> Result<PresenceGuard> {
        let key = (entity.clone(), owner.clone());
        let _ = self.keys.insert(key.clone(), ());
        let keys = Arc::clone(&self.keys);
        Ok(PresenceGuard::new(move || {
            let _ = keys.remove(&key);
        }))
    }

    async fn is_live(&self, entity: &EntityId, owner: &OwnerId) -> Result<bool> {
        Ok(self
            .keys
            .contains_key(&(entity.clone(), owner.clone())))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::reconcile_chain;
    use assert_matches::assert_matches;
    use qualia_graph::Graph;

    fn entity() -> EntityId {
        EntityId::from("e1")
    }

    #[tokio::test]
    async fn entity_created_on_first_reference() {
        let store = MemoryDocumentStore::new();
        let record = store.entity(&entity()).await.unwrap();
        assert_eq!(record.id, entity());
        assert!(record.current_version.is_none());
    }

    #[tokio::test]
    async fn update_entity_commit_persists() {
        let store = MemoryDocumentStore::new();
        let committed = store
            .update_entity(
                &entity(),
                Box::new(|record| {
                    record.balance = 42;
                    TxVerdict::Commit
                }),
            )
            .await
            .unwrap();
        assert!(committed);
        assert_eq!(store.entity(&entity()).await.unwrap().balance, 42);
    }

    #[tokio::test]
    async fn update_entity_abort_discards() {
        let store = MemoryDocumentStore::new();
        let committed = store
            .update_entity(
                &entity(),
                Box::new(|record| {
                    record.balance = 42;
                    TxVerdict::Abort
                }),
            )
            .await
            .unwrap();
        assert!(!committed);
        assert_eq!(store.entity(&entity()).await.unwrap().balance, 0);
    }

    #[tokio::test]
    async fn commit_integration_happy_path() {
        let store = MemoryDocumentStore::new();
        let msg = PendingMessageRecord::new(EntityId::from("s"), entity(), "hello");
        let msg_id = msg.id.clone();
        store.append_message(msg).await.unwrap();

        let audit = AuditRecord::new(entity(), None, Vec::new(), vec![msg_id.clone()], "r");
        let audit_id = audit.id.clone();
        store.append_audit(audit).await.unwrap();

        let version = GraphVersionRecord::new(entity(), Graph::empty(entity()));
        let version_id = version.id.clone();
        let outcome = store
            .commit_integration(
                CommitRequest {
                    entity: entity(),
                    version,
                    ack_messages: vec![msg_id],
                    finalize_audits: vec![audit_id.clone()],
                },
                Box::new(|_| true),
            )
            .await
            .unwrap();

        assert_eq!(outcome, CommitOutcome::Committed(version_id.clone()));
        let record = store.entity(&entity()).await.unwrap();
        assert_eq!(record.current_version, Some(version_id.clone()));
        assert!(store
            .unacknowledged_messages(&entity())
            .await
            .unwrap()
            .is_empty());
        let audit = store.audit(&audit_id).await.unwrap();
        assert_eq!(audit.result_version, Some(version_id));
    }

    #[tokio::test]
    async fn commit_credits_message_amounts() {
        let store = MemoryDocumentStore::new();
        let msg = PendingMessageRecord::new(EntityId::from("s"), entity(), "payment")
            .with_amount(250);
        let msg_id = msg.id.clone();
        store.append_message(msg).await.unwrap();

        let version = GraphVersionRecord::new(entity(), Graph::empty(entity()));
        let _ = store
            .commit_integration(
                CommitRequest {
                    entity: entity(),
                    version,
                    ack_messages: vec![msg_id],
                    finalize_audits: Vec::new(),
                },
                Box::new(|_| true),
            )
            .await
            .unwrap();

        assert_eq!(store.entity(&entity()).await.unwrap().balance, 250);
    }

    #[tokio::test]
    async fn commit_integration_links_prior_version() {
        let store = MemoryDocumentStore::new();
        let first = GraphVersionRecord::new(entity(), Graph::empty(entity()));
        let first_id = first.id.clone();
        let outcome = store
            .commit_integration(
                CommitRequest {
                    entity: entity(),
                    version: first,
                    ack_messages: Vec::new(),
                    finalize_audits: Vec::new(),
                },
                Box::new(|_| true),
            )
            .await
            .unwrap();
        assert_matches!(outcome, CommitOutcome::Committed(_));

        let second = GraphVersionRecord::new(entity(), Graph::empty(entity()));
        let second_id = second.id.clone();
        let _ = store
            .commit_integration(
                CommitRequest {
                    entity: entity(),
                    version: second,
                    ack_messages: Vec::new(),
                    finalize_audits: Vec::new(),
                },
                Box::new(|_| true),
            )
            .await
            .unwrap();

        let first_back = store.version(&first_id).await.unwrap();
        assert_eq!(first_back.next_version, Some(second_id));
    }

    #[tokio::test]
    async fn commit_rejected_by_guard_writes_nothing() {
        let store = MemoryDocumentStore::new();
        let msg = PendingMessageRecord::new(EntityId::from("s"), entity(), "hello");
        let msg_id = msg.id.clone();
        store.append_message(msg).await.unwrap();

        let version = GraphVersionRecord::new(entity(), Graph::empty(entity()));
        let version_id = version.id.clone();
        let outcome = store
            .commit_integration(
                CommitRequest {
                    entity: entity(),
                    version,
                    ack_messages: vec![msg_id],
                    finalize_audits: Vec::new(),
                },
                Box::new(|_| false),
            )
            .await
            .unwrap();

        assert_eq!(outcome, CommitOutcome::Rejected);
        assert!(store.entity(&entity()).await.unwrap().current_version.is_none());
        assert_matches!(
            store.version(&version_id).await,
            Err(StoreError::NotFound { .. })
        );
        assert_eq!(store.unacknowledged_messages(&entity()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn messages_filtered_by_delivery_time() {
        let store = MemoryDocumentStore::new();
        let mut future = PendingMessageRecord::new(EntityId::from("s"), entity(), "later");
        future.deliver_at = Utc::now() + chrono::Duration::hours(1);
        store.append_message(future).await.unwrap();
        store
            .append_message(PendingMessageRecord::new(EntityId::from("s"), entity(), "now"))
            .await
            .unwrap();

        let pending = store.unacknowledged_messages(&entity()).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].body, "now");
    }

    #[tokio::test]
    async fn watch_entity_sees_updates() {
        let store = MemoryDocumentStore::new();
        let mut rx = store.watch_entity(&entity()).await.unwrap();
        let _ = store
            .update_entity(
                &entity(),
                Box::new(|record| {
                    record.balance = 7;
                    TxVerdict::Commit
                }),
            )
            .await
            .unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().balance, 7);
    }

    #[tokio::test]
    async fn watch_messages_bumps_on_append() {
        let store = MemoryDocumentStore::new();
        let mut rx = store.watch_messages(&entity()).await.unwrap();
        let before = *rx.borrow();
        store
            .append_message(PendingMessageRecord::new(EntityId::from("s"), entity(), "x"))
            .await
            .unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), before + 1);
    }

    #[tokio::test]
    async fn reconcile_chain_repairs_missing_links() {
        let store = MemoryDocumentStore::new();
        let mut first = GraphVersionRecord::new(entity(), Graph::empty(entity()));
        first.created_at = Utc::now() - chrono::Duration::minutes(2);
        let first_id = first.id.clone();
        let mut second = GraphVersionRecord::new(entity(), Graph::empty(entity()));
        second.created_at = Utc::now() - chrono::Duration::minutes(1);
        let second_id = second.id.clone();
        store.insert_version(first).await.unwrap();
        store.insert_version(second).await.unwrap();

        let repaired = reconcile_chain(&store, &entity()).await.unwrap();
        assert_eq!(repaired, 1);
        let first_back = store.version(&first_id).await.unwrap();
        assert_eq!(first_back.next_version, Some(second_id));

        // Second pass finds a consistent chain.
        assert_eq!(reconcile_chain(&store, &entity()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn presence_announce_release_cycle() {
        let presence = MemoryPresence::new();
        let owner = OwnerId::new();
        let guard = presence.announce(&entity(), &owner).await.unwrap();
        assert!(presence.is_live(&entity(), &owner).await.unwrap());
        guard.revoke();
        assert!(!presence.is_live(&entity(), &owner).await.unwrap());
    }

    #[tokio::test]
    async fn presence_guard_drop_is_disconnect() {
        let presence = MemoryPresence::new();
        let owner = OwnerId::new();
        {
            let _guard = presence.announce(&entity(), &owner).await.unwrap();
            assert!(presence.is_live(&entity(), &owner).await.unwrap());
        }
        assert!(!presence.is_live(&entity(), &owner).await.unwrap());
    }
}
