//! Graph node, graph, and mutation-operation types.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use qualia_core::{EntityId, NodeId};

// ─────────────────────────────────────────────────────────────────────────────
// Node
// ─────────────────────────────────────────────────────────────────────────────

/// One unit of knowledge: a conclusion plus the assumptions it rests on.
///
/// Assumption edges point at other nodes *within the same graph version*.
/// [`crate::apply`] guarantees every edge resolves by the end of a batch;
/// between batches an unresolved edge means prior corruption.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Identifier, unique within one graph version.
    pub id: NodeId,
    /// The conclusion text.
    pub conclusion: String,
    /// Ids of the nodes this conclusion depends on.
    pub assumptions: BTreeSet<NodeId>,
    /// When this node was first created.
    pub created_at: DateTime<Utc>,
}

impl Node {
    /// Create a node with no assumptions, stamped now.
    #[must_use]
    pub fn new(id: NodeId, conclusion: impl Into<String>) -> Self {
        Self {
            id,
            conclusion: conclusion.into(),
            assumptions: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    /// Builder-style assumption edge.
    #[must_use]
    pub fn with_assumption(mut self, id: NodeId) -> Self {
        let _ = self.assumptions.insert(id);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Graph
// ─────────────────────────────────────────────────────────────────────────────

/// One snapshot of an entity's knowledge graph.
///
/// Graphs are value types here; versioning (immutability, the successor
/// chain, the current-version pointer) is the store's concern.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Graph {
    /// The owning entity.
    pub entity: EntityId,
    /// Node id → node.
    pub nodes: BTreeMap<NodeId, Node>,
}

impl Graph {
    /// Create an empty graph for an entity.
    #[must_use]
    pub fn empty(entity: EntityId) -> Self {
        Self {
            entity,
            nodes: BTreeMap::new(),
        }
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node by id.
    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Insert a node, replacing any node with the same id.
    pub fn insert(&mut self, node: Node) {
        let _ = self.nodes.insert(node.id.clone(), node);
    }

    /// Every `(node, assumption)` pair whose assumption does not resolve.
    ///
    /// Non-empty output on a *stored* graph signals corruption that
    /// predates the current batch.
    #[must_use]
    pub fn unresolved_edges(&self) -> Vec<(NodeId, NodeId)> {
        let mut missing = Vec::new();
        for node in self.nodes.values() {
            for assumption in &node.assumptions {
                if !self.nodes.contains_key(assumption) {
                    missing.push((node.id.clone(), assumption.clone()));
                }
            }
        }
        missing
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MutationOp
// ─────────────────────────────────────────────────────────────────────────────

/// One batch-scoped graph edit proposed by the generative model.
///
/// The payload is closed: unknown fields are rejected at the
/// deserialization boundary rather than silently ignored, since these
/// arrive from an untrusted dynamic source.
///
/// Semantics (see [`crate::apply`]):
/// - `conclusion == Some("")` deletes the target node
/// - absent target + non-empty conclusion creates it
/// - present target updates text and edge set
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MutationOp {
    /// Target node id.
    pub node: NodeId,
    /// New conclusion text; `""` means delete, `None` means keep.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
    /// Assumption ids to add.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_assumptions: Vec<NodeId>,
    /// Assumption ids to remove.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_assumptions: Vec<NodeId>,
}

impl MutationOp {
    /// An update (or create) op setting conclusion text.
    #[must_use]
    pub fn set(node: impl Into<NodeId>, conclusion: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            conclusion: Some(conclusion.into()),
            add_assumptions: Vec::new(),
            remove_assumptions: Vec::new(),
        }
    }

    /// A delete op (`conclusion = ""`).
    #[must_use]
    pub fn delete(node: impl Into<NodeId>) -> Self {
        Self {
            node: node.into(),
            conclusion: Some(String::new()),
            add_assumptions: Vec::new(),
            remove_assumptions: Vec::new(),
        }
    }

    /// An edge-only op touching neither conclusion nor existence.
    #[must_use]
    pub fn edges(node: impl Into<NodeId>) -> Self {
        Self {
            node: node.into(),
            conclusion: None,
            add_assumptions: Vec::new(),
            remove_assumptions: Vec::new(),
        }
    }

    /// Builder: add an assumption edge.
    #[must_use]
    pub fn assuming(mut self, id: impl Into<NodeId>) -> Self {
        self.add_assumptions.push(id.into());
        self
    }

    /// Builder: remove an assumption edge.
    #[must_use]
    pub fn dropping(mut self, id: impl Into<NodeId>) -> Self {
        self.remove_assumptions.push(id.into());
        self
    }

    /// Whether this op deletes its target.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        matches!(self.conclusion.as_deref(), Some(""))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_builder() {
        let node = Node::new(NodeId::from("n1"), "base").with_assumption(NodeId::from("n0"));
        assert_eq!(node.conclusion, "base");
        assert!(node.assumptions.contains(&NodeId::from("n0")));
    }

    #[test]
    fn empty_graph() {
        let g = Graph::empty(EntityId::from("e1"));
        assert!(g.is_empty());
        assert_eq!(g.len(), 0);
        assert!(g.unresolved_edges().is_empty());
    }

    #[test]
    fn unresolved_edges_reported() {
        let mut g = Graph::empty(EntityId::from("e1"));
        g.insert(Node::new(NodeId::from("n1"), "x").with_assumption(NodeId::from("ghost")));
        let missing = g.unresolved_edges();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].1.as_str(), "ghost");
    }

    #[test]
    fn op_is_delete() {
        assert!(MutationOp::delete("n1").is_delete());
        assert!(!MutationOp::set("n1", "text").is_delete());
        assert!(!MutationOp::edges("n1").is_delete());
    }

    #[test]
    fn op_deserializes_camel_case() {
        let json = r#"{"node":"n2","conclusion":"derived","addAssumptions":["n1"]}"#;
        let op: MutationOp = serde_json::from_str(json).unwrap();
        assert_eq!(op.node.as_str(), "n2");
        assert_eq!(op.conclusion.as_deref(), Some("derived"));
        assert_eq!(op.add_assumptions, vec![NodeId::from("n1")]);
        assert!(op.remove_assumptions.is_empty());
    }

    #[test]
    fn op_rejects_unknown_fields() {
        let json = r#"{"node":"n2","surprise":true}"#;
        let parsed: Result<MutationOp, _> = serde_json::from_str(json);
        assert!(parsed.is_err());
    }

    #[test]
    fn op_roundtrip_omits_empty_fields() {
        let op = MutationOp::set("n1", "text");
        let json = serde_json::to_string(&op).unwrap();
        assert!(!json.contains("addAssumptions"));
        assert!(!json.contains("removeAssumptions"));
        let back: MutationOp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn graph_serde_roundtrip() {
        let mut g = Graph::empty(EntityId::from("e1"));
        g.insert(Node::new(NodeId::from("n1"), "base"));
        g.insert(Node::new(NodeId::from("n2"), "derived").with_assumption(NodeId::from("n1")));
        let json = serde_json::to_string(&g).unwrap();
        let back: Graph = serde_json::from_str(&json).unwrap();
        assert_eq!(back, g);
    }
}
