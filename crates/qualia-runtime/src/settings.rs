//! Runtime settings with layered sources.
//!
//! Settings load from three layers, later overriding earlier:
//!
//! 1. Compiled defaults — [`RuntimeSettings::default()`]
//! 2. JSON file (when present)
//! 3. `QUALIA_*` environment variables (nested keys joined with `__`,
//!    e.g. `QUALIA_LOCK__DURATION_SECS=120`)

use std::path::Path;

use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};

use qualia_core::retry::RetryConfig;

/// Lock manager settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockSettings {
    /// Lock duration per acquisition, seconds.
    pub duration_secs: i64,
    /// Margin past expiry before an expired lock may be stolen, seconds.
    pub steal_margin_secs: i64,
    /// Default wait bound for `wait_for_release`, seconds.
    pub wait_timeout_secs: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            duration_secs: 300,
            steal_margin_secs: 30,
            wait_timeout_secs: 120,
        }
    }
}

/// Proposer client settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProposerSettings {
    /// Service base URL.
    pub base_url: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// The model's context budget in tokens.
    pub context_budget: u64,
    /// Size-estimate cache capacity (graph versions).
    pub estimate_cache_capacity: usize,
}

impl Default for ProposerSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8630".to_owned(),
            model: "proposer-large".to_owned(),
            context_budget: 200_000,
            estimate_cache_capacity: 128,
        }
    }
}

/// Integration cycle settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntegrationSettings {
    /// Proposal attempts before the cycle gives up.
    pub max_proposal_retries: u32,
    /// Fraction of the context budget that triggers compaction.
    pub compaction_threshold: f64,
    /// Graphs at or below this node count are exempt from the size guard.
    pub size_guard_min_nodes: usize,
    /// Maximum tolerated node-count drop fraction before the guard trips.
    pub size_guard_max_drop: f64,
}

impl Default for IntegrationSettings {
    fn default() -> Self {
        Self {
            max_proposal_retries: 3,
            compaction_threshold: 0.5,
            size_guard_min_nodes: 10,
            size_guard_max_drop: 0.5,
        }
    }
}

/// Batching settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchSettings {
    /// Granted requests per minute (single-permit model, no burst credit).
    pub rate_per_minute: u32,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self { rate_per_minute: 6 }
    }
}

/// All runtime settings.
///
/// Field names are snake_case on disk so the JSON file and `QUALIA_*`
/// env keys (`QUALIA_LOCK__DURATION_SECS`) line up one-to-one.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Lock manager configuration.
    pub lock: LockSettings,
    /// Proposer client configuration.
    pub proposer: ProposerSettings,
    /// Integration cycle configuration.
    pub integration: IntegrationSettings,
    /// Batching configuration.
    pub batching: BatchSettings,
    /// Transport retry configuration (store + proposer call sites).
    pub retry: RetryConfig,
}

/// Load settings from the default file location (`qualia.json` in the
/// working directory) plus `QUALIA_*` env overrides.
pub fn load_settings() -> Result<RuntimeSettings, figment::Error> {
    load_settings_from(Path::new("qualia.json"))
}

/// Load settings from a specific JSON file plus env overrides.
///
/// A missing file is fine — defaults and env vars still apply.
pub fn load_settings_from(path: &Path) -> Result<RuntimeSettings, figment::Error> {
    Figment::from(Serialized::defaults(RuntimeSettings::default()))
        .merge(Json::file(path))
        .merge(Env::prefixed("QUALIA_").split("__"))
        .extract()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
