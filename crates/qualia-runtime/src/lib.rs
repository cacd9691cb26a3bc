//! # qualia-runtime
//!
//! The end-to-end integration cycle: lock → gather → propose → validate →
//! retry → commit → release, plus the size-triggered compaction variant,
//! the request batcher / rate limiter that shapes inbound bursts, and the
//! pending-message listener that drives it all.

#![deny(unsafe_code)]

pub mod errors;
pub mod limiter;
pub mod listener;
pub mod orchestrator;
pub mod settings;

pub use errors::IntegrationError;
pub use limiter::{BatchProcessor, RateLimiter};
pub use listener::{integration_batcher, spawn_message_listener, ListenerHandle};
pub use orchestrator::{IntegrationOutcome, Orchestrator};
pub use settings::{load_settings, load_settings_from, RuntimeSettings};
