//! # qualia-lock
//!
//! Cross-process mutual exclusion for one entity at a time.
//!
//! The authoritative lock is the `(lock_expiry, lock_owner)` pair on the
//! entity record, written transactionally through the document store. The
//! presence store contributes *liveness only*: a holder that crashed
//! without a clean release leaves lock fields behind but no presence key,
//! and the next acquirer steals the lock after proving the key is gone.
//!
//! Acquisition failure is not an error — it means someone else is working
//! on the entity, and callers either wait ([`LockManager::wait_for_release`])
//! or back off.

#![deny(unsafe_code)]

pub mod errors;
pub mod identity;
pub mod manager;

pub use errors::LockError;
pub use identity::ProcessIdentity;
pub use manager::{LockManager, Precondition, DEFAULT_STEAL_SAFETY_MARGIN_SECS};
