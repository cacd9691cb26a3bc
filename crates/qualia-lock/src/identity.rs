//! Process-scoped lock-owner identity.
//!
//! One `ProcessIdentity` per logical process, created at startup and
//! injected into every component that takes locks. It is an explicit
//! context object rather than a module-level global so tests can run
//! several "processes" inside one binary without cross-contamination.

use qualia_core::OwnerId;

/// The identity a process locks under.
///
/// Not a persistent device identity: every process restart mints a fresh
/// random owner id. That is intentional — a stale persistent identity
/// would need its own expiry story, while a fresh one simply stops
/// resolving in the presence store the moment the process is gone.
#[derive(Clone, Debug)]
pub struct ProcessIdentity {
    owner: OwnerId,
}

impl ProcessIdentity {
    /// Mint a fresh identity for this process lifetime.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            owner: OwnerId::new(),
        }
    }

    /// A fixed identity, for tests that need determinism.
    #[must_use]
    pub fn fixed(owner: impl Into<OwnerId>) -> Self {
        Self {
            owner: owner.into(),
        }
    }

    /// The owner id this process locks under.
    #[must_use]
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_identities_differ() {
        assert_ne!(
            ProcessIdentity::generate().owner(),
            ProcessIdentity::generate().owner()
        );
    }

    #[test]
    fn fixed_identity_is_stable() {
        let identity = ProcessIdentity::fixed("worker-a");
        assert_eq!(identity.owner().as_str(), "worker-a");
    }
}
