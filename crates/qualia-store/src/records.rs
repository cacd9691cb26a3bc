//! Record schemas crossing the storage boundary.
//!
//! All documents are schema-less on the wire; these structs are the typed
//! view this codebase commits to. Timestamps serialize as RFC 3339.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use qualia_core::{AuditId, EntityId, MessageId, OwnerId, VersionId};
use qualia_graph::{Graph, MutationOp};

// ─────────────────────────────────────────────────────────────────────────────
// EntityRecord
// ─────────────────────────────────────────────────────────────────────────────

/// One record per logical actor.
///
/// Created on first reference, never deleted. The `(lock_expiry,
/// lock_owner)` pair *is* the authoritative lock; the presence key only
/// proves liveness. `current_version` is the single source of truth for
/// which graph version is live.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    /// Entity id.
    pub id: EntityId,
    /// Balance in minor currency units.
    pub balance: i64,
    /// Pointer to the live graph version, if any graph exists yet.
    pub current_version: Option<VersionId>,
    /// Lock expiry; `None` means unlocked.
    pub lock_expiry: Option<DateTime<Utc>>,
    /// Owner that recorded the lock.
    pub lock_owner: Option<OwnerId>,
}

impl EntityRecord {
    /// Fresh record for a first-referenced entity.
    #[must_use]
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            balance: 0,
            current_version: None,
            lock_expiry: None,
            lock_owner: None,
        }
    }

    /// Whether a lock is recorded (regardless of expiry or liveness).
    #[must_use]
    pub fn has_lock(&self) -> bool {
        self.lock_expiry.is_some()
    }

    /// Clear the lock fields.
    pub fn clear_lock(&mut self) {
        self.lock_expiry = None;
        self.lock_owner = None;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GraphVersionRecord
// ─────────────────────────────────────────────────────────────────────────────

/// One immutable snapshot of an entity's knowledge graph.
///
/// Append-only: a version is never mutated once a newer one supersedes it,
/// except for the best-effort `next_version` forward pointer, which is a
/// secondary index only (see [`crate::traits::reconcile_chain`]).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphVersionRecord {
    /// Version id.
    pub id: VersionId,
    /// Owning entity.
    pub entity: EntityId,
    /// The graph snapshot.
    pub graph: Graph,
    /// Forward pointer to the superseding version; `None` while current.
    pub next_version: Option<VersionId>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl GraphVersionRecord {
    /// Wrap a graph in a new version record stamped now.
    #[must_use]
    pub fn new(entity: EntityId, graph: Graph) -> Self {
        Self {
            id: VersionId::new(),
            entity,
            graph,
            next_version: None,
            created_at: Utc::now(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PendingMessageRecord
// ─────────────────────────────────────────────────────────────────────────────

/// An inbound communication addressed to an entity.
///
/// Append-only log; only the `acknowledged` flag is ever mutated, and only
/// by the orchestrator inside the integration commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMessageRecord {
    /// Message id.
    pub id: MessageId,
    /// Sending entity.
    pub sender: EntityId,
    /// Receiving entity.
    pub recipient: EntityId,
    /// Free-text payload.
    pub body: String,
    /// Optional monetary amount in minor units.
    pub amount: Option<i64>,
    /// Scheduled delivery time.
    pub deliver_at: DateTime<Utc>,
    /// Set once the orchestrator has integrated this message.
    pub acknowledged: bool,
}

impl PendingMessageRecord {
    /// A message deliverable now.
    #[must_use]
    pub fn new(sender: EntityId, recipient: EntityId, body: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            sender,
            recipient,
            body: body.into(),
            amount: None,
            deliver_at: Utc::now(),
            acknowledged: false,
        }
    }

    /// Builder: attach a monetary amount.
    #[must_use]
    pub fn with_amount(mut self, amount: i64) -> Self {
        self.amount = Some(amount);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AuditRecord
// ─────────────────────────────────────────────────────────────────────────────

/// Forensic record of one proposal cycle.
///
/// Written *before* the proposal is applied so a crash mid-cycle leaves
/// evidence; stamped with `result_version` once the commit lands.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Audit id.
    pub id: AuditId,
    /// Entity whose graph the proposal targets.
    pub entity: EntityId,
    /// Version the proposal was computed against.
    pub prior_version: Option<VersionId>,
    /// The proposed operation batch.
    pub operations: Vec<MutationOp>,
    /// Messages the proposal claims to integrate.
    pub integrates: Vec<MessageId>,
    /// Proposer-supplied reasoning text.
    pub reasoning: String,
    /// Error annotation (validation failure, guard rejection, …).
    pub error: Option<String>,
    /// Version the commit produced, once known.
    pub result_version: Option<VersionId>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// New audit record for a freshly received proposal.
    #[must_use]
    pub fn new(
        entity: EntityId,
        prior_version: Option<VersionId>,
        operations: Vec<MutationOp>,
        integrates: Vec<MessageId>,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            id: AuditId::new(),
            entity,
            prior_version,
            operations,
            integrates,
            reasoning: reasoning.into(),
            error: None,
            result_version: None,
            created_at: Utc::now(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
