//! Pending-message listener.
//!
//! One listener per entity: it subscribes to the store's message-arrival
//! notifications and enqueues the entity into a [`BatchProcessor`] on each
//! arrival. The batcher's handler (see [`integration_batcher`]) dedups
//! entities and drives the orchestrator, so a burst of messages costs one
//! integration cycle, not one per message.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use qualia_core::EntityId;
use qualia_store::{DocumentStore, StoreError};

use crate::limiter::{BatchProcessor, RateLimiter};
use crate::orchestrator::Orchestrator;

/// Cancels its listener task when dropped, or explicitly via
/// [`ListenerHandle::stop`]. Each handle is individually cancellable.
#[derive(Debug)]
pub struct ListenerHandle {
    worker: JoinHandle<()>,
}

impl ListenerHandle {
    /// Stop listening.
    pub fn stop(self) {
        self.worker.abort();
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

/// Subscribe to an entity's message arrivals and feed the batcher.
pub async fn spawn_message_listener(
    store: Arc<dyn DocumentStore>,
    entity: EntityId,
    batcher: Arc<BatchProcessor<EntityId>>,
) -> Result<ListenerHandle, StoreError> {
    let mut arrivals = store.watch_messages(&entity).await?;

    let worker = tokio::spawn(async move {
        // The receiver holding the subscription lives inside this task;
        // aborting the task drops it and unsubscribes.
        while arrivals.changed().await.is_ok() {
            debug!(entity = %entity, "message arrival, queueing integration");
            batcher.add(entity.clone());
        }
    });

    Ok(ListenerHandle { worker })
}

/// A batcher whose handler integrates each distinct queued entity.
#[must_use]
pub fn integration_batcher(
    orchestrator: Arc<Orchestrator>,
    limiter: Arc<RateLimiter>,
) -> BatchProcessor<EntityId> {
    BatchProcessor::new(limiter, move |entities: Vec<EntityId>| {
        let orchestrator = Arc::clone(&orchestrator);
        async move {
            let mut seen = BTreeSet::new();
            for entity in entities {
                if !seen.insert(entity.clone()) {
                    continue;
                }
                match orchestrator.integrate(&entity, None).await {
                    Ok(outcome) => debug!(entity = %entity, ?outcome, "integration cycle finished"),
                    Err(err) => error!(entity = %entity, error = %err, "integration cycle failed"),
                }
            }
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
