//! Graph size estimation with a per-version cache.
//!
//! Token counting goes over the wire and is expensive; a graph version is
//! immutable once written, so its count never changes. That makes an LRU
//! keyed by version identity sound: one count per version, ever.
//!
//! The estimator is an injected instance, not a module-level cache, so
//! tests can run several isolated "processes" in one binary.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use qualia_core::VersionId;

use crate::client::Proposer;
use crate::errors::ProposerError;

/// Default number of cached version estimates.
pub const DEFAULT_CACHE_CAPACITY: usize = 128;

/// Token-count estimator with an LRU cache keyed by graph version.
pub struct SizeEstimator {
    proposer: Arc<dyn Proposer>,
    cache: Mutex<Lru>,
}

impl SizeEstimator {
    /// Create an estimator over the given proposer.
    #[must_use]
    pub fn new(proposer: Arc<dyn Proposer>, capacity: usize) -> Self {
        Self {
            proposer,
            cache: Mutex::new(Lru::new(capacity.max(1))),
        }
    }

    /// Estimated token count for `text`, cached under `version`.
    pub async fn estimated_tokens(
        &self,
        version: &VersionId,
        text: &str,
    ) -> Result<u64, ProposerError> {
        if let Some(hit) = self.cache.lock().get(version) {
            trace!(version = %version, tokens = hit, "size estimate cache hit");
            return Ok(hit);
        }

        let tokens = self.proposer.count_tokens(text).await?;
        self.cache.lock().put(version.clone(), tokens);
        trace!(version = %version, tokens, "size estimate cached");
        Ok(tokens)
    }

    /// Fraction of the proposer's context budget the text occupies.
    pub async fn budget_ratio(
        &self,
        version: &VersionId,
        text: &str,
    ) -> Result<f64, ProposerError> {
        let tokens = self.estimated_tokens(version, text).await?;
        let budget = self.proposer.context_budget().max(1);
        #[allow(clippy::cast_precision_loss)]
        Ok(tokens as f64 / budget as f64)
    }
}

/// Minimal LRU: map + recency queue, promote on hit, evict front.
struct Lru {
    capacity: usize,
    map: HashMap<VersionId, u64>,
    recency: VecDeque<VersionId>,
}

impl Lru {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::with_capacity(capacity),
            recency: VecDeque::with_capacity(capacity),
        }
    }

    fn get(&mut self, key: &VersionId) -> Option<u64> {
        let value = *self.map.get(key)?;
        self.touch(key);
        Some(value)
    }

    fn put(&mut self, key: VersionId, value: u64) {
        if self.map.insert(key.clone(), value).is_some() {
            self.touch(&key);
            return;
        }
        self.recency.push_back(key);
        if self.map.len() > self.capacity {
            if let Some(evicted) = self.recency.pop_front() {
                let _ = self.map.remove(&evicted);
            }
        }
    }

    fn touch(&mut self, key: &VersionId) {
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            if let Some(k) = self.recency.remove(pos) {
                self.recency.push_back(k);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
