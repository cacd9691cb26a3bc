//! The batch mutation engine.
//!
//! [`apply`] is a pure function from `(graph, operations)` to a new graph.
//! It either returns a graph in which every assumption edge resolves, or an
//! error — never a partially applied batch, and never a graph with a
//! dangling edge. The input graph is left untouched.
//!
//! Processing order:
//!
//! 1. Corruption pre-check on the *input* graph (prior damage, fatal).
//! 2. Each operation in batch order: delete / create / update.
//! 3. Auto-heal: surviving nodes drop edges to ids deleted this batch.
//! 4. Final resolution pass; all accumulated errors raised together.

use std::collections::BTreeSet;

use crate::errors::GraphError;
use crate::types::{Graph, MutationOp, Node};

/// Apply a batch of operations, producing a new graph.
///
/// # Errors
///
/// [`GraphError::Corruption`] if the input graph already had unresolved
/// edges; [`GraphError::Validation`] carrying every accumulated,
/// deduplicated error if the batch is invalid. On error nothing is applied.
pub fn apply(graph: &Graph, operations: &[MutationOp]) -> Result<Graph, GraphError> {
    // Unresolved edges here predate this batch. Distinguishing them from
    // errors the batch itself causes matters: this path is fatal and must
    // not trigger a corrective re-prompt.
    let pre_existing = graph.unresolved_edges();
    if !pre_existing.is_empty() {
        let details = pre_existing
            .into_iter()
            .map(|(node, missing)| format!("node \"{node}\" references missing node \"{missing}\""))
            .collect();
        return Err(GraphError::Corruption { details });
    }

    let mut nodes = graph.nodes.clone();
    let mut deleted_this_batch: BTreeSet<_> = BTreeSet::new();
    let mut errors: Vec<String> = Vec::new();

    for op in operations {
        if op.is_delete() {
            if nodes.remove(&op.node).is_some() {
                let _ = deleted_this_batch.insert(op.node.clone());
            } else if !deleted_this_batch.contains(&op.node) {
                // Deleting an id this batch already removed is idempotent;
                // deleting an id that never existed is likely a typo.
                errors.push(format!("delete of unknown node \"{}\"", op.node));
            }
            continue;
        }

        if let Some(node) = nodes.get_mut(&op.node) {
            // Update: replace text if provided, apply edge set as a set.
            if let Some(text) = &op.conclusion {
                node.conclusion.clone_from(text);
            }
            for added in &op.add_assumptions {
                let _ = node.assumptions.insert(added.clone());
            }
            for removed in &op.remove_assumptions {
                let _ = node.assumptions.remove(removed);
            }
        } else if let Some(text) = &op.conclusion {
            // Create. Edge ops in the same operation apply to the new node.
            let mut node = Node::new(op.node.clone(), text.clone());
            for added in &op.add_assumptions {
                let _ = node.assumptions.insert(added.clone());
            }
            for removed in &op.remove_assumptions {
                let _ = node.assumptions.remove(removed);
            }
            let _ = nodes.insert(op.node.clone(), node);
            // A recreated id is no longer "deleted this batch" — edges to
            // it resolve again and must survive the cleanup pass.
            let _ = deleted_this_batch.remove(&op.node);
        } else {
            let mut msg = format!("update of nonexistent node \"{}\"", op.node);
            if !op.add_assumptions.is_empty() {
                let ids: Vec<&str> = op.add_assumptions.iter().map(AsRef::as_ref).collect();
                msg.push_str(&format!(" (assumptions [{}])", ids.join(", ")));
            }
            msg.push_str(" needs conclusion text to create it");
            errors.push(msg);
        }
    }

    // Deletion auto-heals: survivors drop edges into the deleted set rather
    // than being left dangling.
    if !deleted_this_batch.is_empty() {
        for node in nodes.values_mut() {
            node.assumptions
                .retain(|assumption| !deleted_this_batch.contains(assumption));
        }
    }

    // Final pass: anything still unresolved was introduced by this batch
    // (e.g. an edge added to an id that was never created).
    for node in nodes.values() {
        for assumption in &node.assumptions {
            if !nodes.contains_key(assumption) {
                errors.push(format!(
                    "node \"{}\" references unresolved assumption \"{}\"",
                    node.id, assumption
                ));
            }
        }
    }

    if !errors.is_empty() {
        return Err(GraphError::Validation {
            errors: dedup_preserving_order(errors),
            operations: operations.to_vec(),
        });
    }

    Ok(Graph {
        entity: graph.entity.clone(),
        nodes,
    })
}

/// Deduplicate while keeping first-occurrence order.
fn dedup_preserving_order(errors: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    errors.into_iter().filter(|e| seen.insert(e.clone())).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
