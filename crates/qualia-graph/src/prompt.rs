//! Proposer-facing graph serialization.
//!
//! Flattens the node set into a stable ordered list: frontier seeded with
//! nodes that have no incoming edges (oldest first), each visited node
//! followed by its not-yet-visited assumptions. When the frontier runs dry
//! with nodes still unvisited (cycles, disconnected components), the oldest
//! unvisited node reseeds it.
//!
//! This ordering is a presentation concern only — it gives the proposer a
//! readable, roughly cause-before-effect view and must never be relied on
//! for correctness.

use std::collections::{BTreeSet, VecDeque};
use std::fmt::Write as _;

use qualia_core::NodeId;

use crate::types::{Graph, Node};

fn age_order<'g>(a: &&'g Node, b: &&'g Node) -> std::cmp::Ordering {
    a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
}

/// Flatten the graph into presentation order.
///
/// Every node appears exactly once regardless of connectivity.
#[must_use]
pub fn flatten_for_prompt(graph: &Graph) -> Vec<&Node> {
    let mut has_incoming: BTreeSet<&NodeId> = BTreeSet::new();
    for node in graph.nodes.values() {
        for assumption in &node.assumptions {
            let _ = has_incoming.insert(assumption);
        }
    }

    let mut roots: Vec<&Node> = graph
        .nodes
        .values()
        .filter(|node| !has_incoming.contains(&node.id))
        .collect();
    roots.sort_by(age_order);

    let mut visited: BTreeSet<&NodeId> = BTreeSet::new();
    let mut ordered: Vec<&Node> = Vec::with_capacity(graph.len());
    let mut frontier: VecDeque<&Node> = roots.into();

    while ordered.len() < graph.len() {
        if frontier.is_empty() {
            // Cycle or disconnected remainder: reseed from the oldest
            // unvisited node.
            let Some(seed) = graph
                .nodes
                .values()
                .filter(|node| !visited.contains(&node.id))
                .min_by(|a, b| age_order(a, b))
            else {
                break;
            };
            frontier.push_back(seed);
        }

        while let Some(node) = frontier.pop_front() {
            if !visited.insert(&node.id) {
                continue;
            }
            ordered.push(node);

            let mut next: Vec<&Node> = node
                .assumptions
                .iter()
                .filter_map(|id| graph.nodes.get(id))
                .filter(|n| !visited.contains(&n.id))
                .collect();
            next.sort_by(age_order);
            for (i, n) in next.into_iter().enumerate() {
                frontier.insert(i, n);
            }
        }
    }

    ordered
}

/// Render the graph as the textual payload sent to the proposer.
#[must_use]
pub fn render_for_prompt(graph: &Graph) -> String {
    let ordered = flatten_for_prompt(graph);
    if ordered.is_empty() {
        return "(empty graph)".to_owned();
    }

    let mut out = String::new();
    for node in ordered {
        let _ = write!(out, "[{}] {}", node.id, node.conclusion);
        if !node.assumptions.is_empty() {
            let ids: Vec<&str> = node.assumptions.iter().map(AsRef::as_ref).collect();
            let _ = write!(out, " (assumes: {})", ids.join(", "));
        }
        out.push('\n');
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use qualia_core::EntityId;

    fn node_at(id: &str, minutes_ago: i64, assumptions: &[&str]) -> Node {
        let mut node = Node::new(NodeId::from(id), format!("c-{id}"));
        node.created_at = Utc::now() - Duration::minutes(minutes_ago);
        for a in assumptions {
            node = node.with_assumption(NodeId::from(*a));
        }
        node
    }

    fn graph(nodes: Vec<Node>) -> Graph {
        let mut g = Graph::empty(EntityId::from("e1"));
        for n in nodes {
            g.insert(n);
        }
        g
    }

    #[test]
    fn empty_graph_renders_placeholder() {
        let g = Graph::empty(EntityId::from("e1"));
        assert!(flatten_for_prompt(&g).is_empty());
        assert_eq!(render_for_prompt(&g), "(empty graph)");
    }

    #[test]
    fn every_node_appears_exactly_once() {
        let g = graph(vec![
            node_at("a", 30, &["b"]),
            node_at("b", 20, &[]),
            node_at("c", 10, &[]),
        ]);
        let order = flatten_for_prompt(&g);
        assert_eq!(order.len(), 3);
        let mut ids: Vec<&str> = order.iter().map(|n| n.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn assumptions_follow_their_dependent() {
        let g = graph(vec![
            node_at("root", 30, &["mid"]),
            node_at("mid", 20, &["leaf"]),
            node_at("leaf", 10, &[]),
        ]);
        let ids: Vec<&str> = flatten_for_prompt(&g).iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["root", "mid", "leaf"]);
    }

    #[test]
    fn roots_ordered_oldest_first() {
        let g = graph(vec![node_at("young", 5, &[]), node_at("old", 50, &[])]);
        let ids: Vec<&str> = flatten_for_prompt(&g).iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["old", "young"]);
    }

    #[test]
    fn pure_cycle_seeds_from_oldest() {
        // No node is edge-free, so the frontier starts empty.
        let g = graph(vec![node_at("x", 10, &["y"]), node_at("y", 40, &["x"])]);
        let ids: Vec<&str> = flatten_for_prompt(&g).iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], "y", "oldest unvisited node seeds the frontier");
    }

    #[test]
    fn render_lists_assumption_ids() {
        let g = graph(vec![node_at("a", 20, &["b"]), node_at("b", 10, &[])]);
        let text = render_for_prompt(&g);
        assert!(text.contains("[a] c-a (assumes: b)"));
        assert!(text.contains("[b] c-b"));
    }

    #[test]
    fn shared_assumption_listed_once() {
        let g = graph(vec![
            node_at("p", 30, &["shared"]),
            node_at("q", 20, &["shared"]),
            node_at("shared", 40, &[]),
        ]);
        let ids: Vec<&str> = flatten_for_prompt(&g).iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids.iter().filter(|i| **i == "shared").count(), 1);
    }
}
