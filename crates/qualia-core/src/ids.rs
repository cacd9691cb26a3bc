//! Branded ID newtypes for type safety.
//!
//! Every record in the qualia system has a distinct ID type implemented as
//! a newtype wrapper around `String`. This prevents accidentally passing a
//! message ID where a graph-version ID is expected.
//!
//! Generated IDs are UUID v7 (time-ordered) via [`uuid::Uuid::now_v7`].
//! [`OwnerId`] is the one exception worth calling out: it identifies a
//! *process lifetime*, not a device. Every process start mints a fresh one,
//! so a crashed holder's identity simply stops resolving instead of needing
//! its own expiry.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate a new UUID v7 string (time-ordered).
fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Unique identifier for an entity (one knowledge graph, one lock).
    EntityId
}

branded_id! {
    /// Unique identifier for an immutable graph version.
    VersionId
}

branded_id! {
    /// Identifier for a node within a graph version.
    ///
    /// Node IDs are chosen by the proposer, not generated here, so they are
    /// short human-readable strings rather than UUIDs in practice.
    NodeId
}

branded_id! {
    /// Unique identifier for a pending message.
    MessageId
}

branded_id! {
    /// Unique identifier for an audit-log record.
    AuditId
}

branded_id! {
    /// Process-lifetime lock-owner identity.
    ///
    /// Deliberately non-persistent: a restart gets a new one. Stale
    /// identities would otherwise require separate expiry of their own.
    OwnerId
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_new_is_uuid_v7() {
        let id = EntityId::new();
        let parsed = Uuid::parse_str(id.as_str()).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn version_id_new_is_uuid_v7() {
        let id = VersionId::new();
        let parsed = Uuid::parse_str(id.as_str()).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn owner_ids_are_unique_per_mint() {
        let a = OwnerId::new();
        let b = OwnerId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn node_id_from_str_ref() {
        let id = NodeId::from("n1");
        assert_eq!(id.as_str(), "n1");
    }

    #[test]
    fn deref_to_str() {
        let id = MessageId::from("hello");
        let s: &str = &id;
        assert_eq!(s, "hello");
    }

    #[test]
    fn display() {
        let id = AuditId::from("display-me");
        assert_eq!(format!("{id}"), "display-me");
    }

    #[test]
    fn into_string() {
        let id = EntityId::from("convert");
        let s: String = id.into();
        assert_eq!(s, "convert");
    }

    #[test]
    fn serde_roundtrip_is_transparent() {
        let id = VersionId::from("serde-test");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"serde-test\"");
        let back: VersionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn serde_in_struct() {
        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct Pointer {
            entity: EntityId,
            version: VersionId,
        }

        let ptr = Pointer {
            entity: EntityId::from("e-1"),
            version: VersionId::from("v-1"),
        };
        let json = serde_json::to_string(&ptr).unwrap();
        let back: Pointer = serde_json::from_str(&json).unwrap();
        assert_eq!(ptr, back);
    }

    #[test]
    fn node_ids_order_and_hash() {
        use std::collections::BTreeSet;
        let mut set = BTreeSet::new();
        let _ = set.insert(NodeId::from("b"));
        let _ = set.insert(NodeId::from("a"));
        let _ = set.insert(NodeId::from("a"));
        assert_eq!(set.len(), 2);
        assert_eq!(set.iter().next().unwrap().as_str(), "a");
    }

    #[test]
    fn default_creates_new() {
        let id1 = OwnerId::default();
        let id2 = OwnerId::default();
        assert_ne!(id1, id2, "default should create unique IDs");
    }

    #[test]
    fn into_inner() {
        let id = EntityId::from("inner-test");
        assert_eq!(id.into_inner(), "inner-test");
    }
}
