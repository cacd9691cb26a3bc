//! The integration / compaction orchestrator.
//!
//! One cycle per entity: acquire the lock, re-read the current graph
//! version (short-circuiting if a newer one appeared while the lock was
//! awaited), gather unacknowledged messages, ask the proposer for an edit
//! batch, persist the audit record *before* applying it, validate, retry
//! with the error appended on validation failures and cycles, run the
//! integrity guard, commit through the lock-verified transaction, and only
//! then release.
//!
//! The proposal retry loop is bounded by `max_proposal_retries`; the lock
//! duration remains the backstop for everything else.

use std::sync::Arc;

use chrono::Duration;
use tracing::{error, info, warn};

use qualia_core::{AuditId, EntityId, MessageId, VersionId};
use qualia_graph::{apply, detect_cycles, render_for_prompt, Graph, GraphError};
use qualia_lock::LockManager;
use qualia_proposer::{MessageContext, ProposalRequest, Proposer, SizeEstimator};
use qualia_store::{
    AuditRecord, CommitRequest, DocumentStore, GraphVersionRecord, PendingMessageRecord,
};

use crate::errors::IntegrationError;
use crate::settings::{IntegrationSettings, RuntimeSettings};

/// Outcome of one integration request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IntegrationOutcome {
    /// Someone else holds the entity's lock; try again later.
    Busy,
    /// No unacknowledged messages were waiting.
    NothingPending,
    /// A newer version already existed when the lock was granted; its id
    /// is returned instead of redoing the work.
    ShortCircuit(VersionId),
    /// A new version was committed.
    Integrated {
        /// The committed version.
        version: VersionId,
        /// Total proposal attempts across the cycle.
        attempts: u32,
        /// Messages folded in and acknowledged.
        integrated: Vec<MessageId>,
    },
}

/// Drives integration and compaction cycles for entities.
pub struct Orchestrator {
    documents: Arc<dyn DocumentStore>,
    locks: Arc<LockManager>,
    proposer: Arc<dyn Proposer>,
    estimator: Arc<SizeEstimator>,
    settings: RuntimeSettings,
}

impl Orchestrator {
    /// Assemble an orchestrator from its collaborators.
    #[must_use]
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        locks: Arc<LockManager>,
        proposer: Arc<dyn Proposer>,
        estimator: Arc<SizeEstimator>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            documents,
            locks,
            proposer,
            estimator,
            settings,
        }
    }

    fn lock_duration(&self) -> Duration {
        Duration::seconds(self.settings.lock.duration_secs)
    }

    /// Integrate the entity's pending messages into its graph.
    ///
    /// `observed` is the version the caller last saw; if a different
    /// version is current once the lock is granted, the cycle
    /// short-circuits and returns it instead of redoing work.
    pub async fn integrate(
        &self,
        entity: &EntityId,
        observed: Option<&VersionId>,
    ) -> Result<IntegrationOutcome, IntegrationError> {
        let ran = self
            .locks
            .run_exclusive(entity, self.lock_duration(), None, || {
                self.run_cycle(entity, observed, false)
            })
            .await?;
        match ran {
            None => Ok(IntegrationOutcome::Busy),
            Some(outcome) => outcome,
        }
    }

    /// Run a compaction cycle regardless of current size.
    pub async fn compact(&self, entity: &EntityId) -> Result<IntegrationOutcome, IntegrationError> {
        let ran = self
            .locks
            .run_exclusive(entity, self.lock_duration(), None, || {
                self.run_cycle(entity, None, true)
            })
            .await?;
        match ran {
            None => Ok(IntegrationOutcome::Busy),
            Some(outcome) => outcome,
        }
    }

    /// Compact only if the serialized graph exceeds the threshold share of
    /// the proposer's context budget. Returns `None` when under threshold
    /// or when no graph exists yet.
    pub async fn compact_if_oversized(
        &self,
        entity: &EntityId,
    ) -> Result<Option<IntegrationOutcome>, IntegrationError> {
        let record = self.documents.entity(entity).await?;
        let Some(version_id) = record.current_version else {
            return Ok(None);
        };
        let version = self.documents.version(&version_id).await?;
        let text = render_for_prompt(&version.graph);
        let ratio = self.estimator.budget_ratio(&version_id, &text).await?;
        if ratio < self.settings.integration.compaction_threshold {
            return Ok(None);
        }

        info!(
            entity = %entity,
            ratio,
            threshold = self.settings.integration.compaction_threshold,
            "graph over size threshold, compacting"
        );
        Ok(Some(self.compact(entity).await?))
    }

    /// One full cycle, executed while holding the entity's lock.
    async fn run_cycle(
        &self,
        entity: &EntityId,
        observed: Option<&VersionId>,
        compacting: bool,
    ) -> Result<IntegrationOutcome, IntegrationError> {
        // Re-read under the lock: the world may have moved while we waited.
        let record = self.documents.entity(entity).await?;
        if let (Some(observed), Some(current)) = (observed, record.current_version.as_ref()) {
            if observed != current {
                info!(entity = %entity, version = %current, "newer version exists, short-circuiting");
                return Ok(IntegrationOutcome::ShortCircuit(current.clone()));
            }
        }

        let graph = match &record.current_version {
            Some(version_id) => self.documents.version(version_id).await?.graph,
            None => Graph::empty(entity.clone()),
        };

        let messages = self.documents.unacknowledged_messages(entity).await?;
        if messages.is_empty() && !compacting {
            return Ok(IntegrationOutcome::NothingPending);
        }
        let message_ids: Vec<MessageId> = messages.iter().map(|m| m.id.clone()).collect();
        let contexts: Vec<MessageContext> = messages.iter().map(message_context).collect();

        let prior_version = record.current_version.clone();
        let mut working_graph = graph;
        let mut audit_ids: Vec<AuditId> = Vec::new();
        let mut attempts_total = 0u32;
        let mut last_tokens: Option<u64> = None;

        loop {
            let (new_graph, attempts) = self
                .propose_valid_graph(
                    entity,
                    &working_graph,
                    prior_version.as_ref(),
                    &contexts,
                    &message_ids,
                    compacting,
                    &mut audit_ids,
                )
                .await?;
            attempts_total += attempts;

            let before = working_graph.len();
            let after = new_graph.len();
            if self.guard_trips(before, after) {
                let note = format!("integrity guard: node count would drop {before} -> {after}");
                if let Some(last) = audit_ids.last() {
                    self.documents.annotate_audit(last, &note).await?;
                }
                error!(entity = %entity, before, after, "integrity guard rejected proposal");
                return Err(IntegrationError::IntegrityGuard {
                    entity: entity.clone(),
                    before,
                    after,
                });
            }

            working_graph = new_graph;
            if !compacting {
                break;
            }

            // Interim graphs have no version id yet, so count directly
            // instead of going through the per-version cache.
            let text = render_for_prompt(&working_graph);
            let tokens = self.proposer.count_tokens(&text).await?;
            let budget = self.proposer.context_budget().max(1);
            #[allow(clippy::cast_precision_loss)]
            let ratio = tokens as f64 / budget as f64;
            if ratio < self.settings.integration.compaction_threshold {
                break;
            }
            if last_tokens.is_some_and(|previous| tokens >= previous) {
                return Err(IntegrationError::RetriesExhausted {
                    attempts: attempts_total,
                    last_error: format!(
                        "compaction made no progress: still {tokens} tokens against budget {budget}"
                    ),
                });
            }
            last_tokens = Some(tokens);
            info!(entity = %entity, tokens, ratio, "still over threshold, compacting further");
        }

        // Single commit: new version, pointer advance, message acks, and
        // every accumulated audit stamped with the final version id.
        let version = GraphVersionRecord::new(entity.clone(), working_graph);
        let version_id = self
            .locks
            .commit_verified(CommitRequest {
                entity: entity.clone(),
                version,
                ack_messages: message_ids.clone(),
                finalize_audits: audit_ids,
            })
            .await?;

        info!(
            entity = %entity,
            version = %version_id,
            attempts = attempts_total,
            integrated = message_ids.len(),
            compacting,
            "integration committed"
        );
        Ok(IntegrationOutcome::Integrated {
            version: version_id,
            attempts: attempts_total,
            integrated: message_ids,
        })
    }

    /// The propose → validate retry loop.
    ///
    /// Returns the first graph that applies cleanly and is acyclic, plus
    /// the number of attempts spent. Every proposal is audited before it
    /// is applied; failed attempts annotate their audit record.
    #[allow(clippy::too_many_arguments)]
    async fn propose_valid_graph(
        &self,
        entity: &EntityId,
        graph: &Graph,
        prior_version: Option<&VersionId>,
        contexts: &[MessageContext],
        message_ids: &[MessageId],
        compacting: bool,
        audit_ids: &mut Vec<AuditId>,
    ) -> Result<(Graph, u32), IntegrationError> {
        let max_attempts = self.settings.integration.max_proposal_retries.max(1);
        let mut prior_error: Option<String> = None;

        for attempt in 1..=max_attempts {
            let mut request =
                ProposalRequest::integrate(render_for_prompt(graph), contexts.to_vec());
            if compacting {
                request = request.compacting();
            }
            if let Some(text) = &prior_error {
                request = request.with_prior_error(text.clone());
            }

            let proposal = self.proposer.propose_edits(&request).await?;

            // Forensic evidence first: a crash between here and the commit
            // must leave the proposal on record.
            let audit = AuditRecord::new(
                entity.clone(),
                prior_version.cloned(),
                proposal.operations.clone(),
                message_ids.to_vec(),
                proposal.reasoning.clone(),
            );
            let audit_id = audit.id.clone();
            self.documents.append_audit(audit).await?;
            audit_ids.push(audit_id.clone());

            match apply(graph, &proposal.operations) {
                Err(corruption @ GraphError::Corruption { .. }) => {
                    self.documents
                        .annotate_audit(&audit_id, &corruption.to_string())
                        .await?;
                    error!(entity = %entity, error = %corruption, "stored graph corrupt, cycle is fatal");
                    return Err(corruption.into());
                }
                Err(validation) => {
                    let text = validation.to_string();
                    self.documents.annotate_audit(&audit_id, &text).await?;
                    warn!(entity = %entity, attempt, error = %text, "validation failed, re-prompting");
                    prior_error = Some(text);
                }
                Ok(new_graph) => {
                    if let Some(path) = detect_cycles(&new_graph) {
                        let ids: Vec<&str> = path.iter().map(AsRef::as_ref).collect();
                        let text = format!("cycle detected: {}", ids.join(" -> "));
                        self.documents.annotate_audit(&audit_id, &text).await?;
                        warn!(entity = %entity, attempt, error = %text, "cycle detected, re-prompting");
                        prior_error = Some(text);
                    } else {
                        return Ok((new_graph, attempt));
                    }
                }
            }
        }

        Err(IntegrationError::RetriesExhausted {
            attempts: max_attempts,
            last_error: prior_error.unwrap_or_else(|| "no error recorded".to_owned()),
        })
    }

    fn guard_trips(&self, before: usize, after: usize) -> bool {
        shrink_guard_trips(&self.settings.integration, before, after)
    }
}

/// Whether a node-count drop is catastrophic enough to reject.
///
/// Small graphs are exempt; on larger ones, losing more than the
/// configured fraction of nodes in one batch reads as a runaway
/// "delete everything" proposal rather than legitimate editing.
fn shrink_guard_trips(settings: &IntegrationSettings, before: usize, after: usize) -> bool {
    #[allow(clippy::cast_precision_loss)]
    let floor = (before as f64) * (1.0 - settings.size_guard_max_drop);
    #[allow(clippy::cast_precision_loss)]
    let after_f = after as f64;
    before > settings.size_guard_min_nodes && after_f < floor
}

fn message_context(message: &PendingMessageRecord) -> MessageContext {
    MessageContext {
        id: message.id.clone(),
        sender: message.sender.clone(),
        body: message.body.clone(),
        amount: message.amount,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(before: usize, after: usize) -> bool {
        shrink_guard_trips(&IntegrationSettings::default(), before, after)
    }

    #[test]
    fn guard_trips_on_catastrophic_drop() {
        assert!(guard(20, 5));
    }

    #[test]
    fn guard_allows_exactly_half() {
        assert!(!guard(20, 10));
    }

    #[test]
    fn guard_ignores_small_graphs() {
        assert!(!guard(10, 0));
        assert!(!guard(4, 1));
    }

    #[test]
    fn guard_allows_growth() {
        assert!(!guard(20, 25));
    }
}
