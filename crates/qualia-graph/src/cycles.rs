//! Cycle detection over assumption edges.
//!
//! Runs only on a successfully applied graph: cycle errors and validation
//! errors need different corrective instructions to the proposer, so they
//! are detected and reported separately.
//!
//! The traversal is depth-first with an explicit frame stack — no
//! recursion, so pathological graphs cannot blow the call stack. The
//! result is the first discovered back-edge path.

use std::collections::HashMap;

use qualia_core::NodeId;

use crate::types::Graph;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// Currently on the traversal stack.
    InStack,
    /// Fully explored, known cycle-free from here.
    Done,
}

/// Find a cycle in the assumption relation, if one exists.
///
/// Returns the path from the re-entered node to the node whose edge closes
/// the cycle: for a result `[a, b, c]`, `b` is one of `a`'s assumptions,
/// `c` one of `b`'s, and `a` one of `c`'s. Every component is visited, not
/// just one root, since the graph need not be connected.
#[must_use]
pub fn detect_cycles(graph: &Graph) -> Option<Vec<NodeId>> {
    let mut marks: HashMap<&NodeId, Mark> = HashMap::with_capacity(graph.len());

    // BTreeMap key order makes the "first" discovered back edge stable.
    for start in graph.nodes.keys() {
        if marks.contains_key(start) {
            continue;
        }

        let mut stack: Vec<(&NodeId, std::collections::btree_set::Iter<'_, NodeId>)> = Vec::new();
        let _ = marks.insert(start, Mark::InStack);
        stack.push((start, graph.nodes[start].assumptions.iter()));

        while let Some(frame) = stack.last_mut() {
            let Some(next) = frame.1.next() else {
                if let Some((finished, _)) = stack.pop() {
                    let _ = marks.insert(finished, Mark::Done);
                }
                continue;
            };
            let Some(node) = graph.nodes.get(next) else {
                // Dangling edge; apply() never lets one through, so just
                // skip rather than panic on damaged input.
                continue;
            };
            match marks.get(next) {
                Some(Mark::InStack) => {
                    let pos = stack.iter().position(|(id, _)| *id == next).unwrap_or(0);
                    return Some(stack[pos..].iter().map(|(id, _)| (*id).clone()).collect());
                }
                Some(Mark::Done) => {}
                None => {
                    let _ = marks.insert(next, Mark::InStack);
                    stack.push((next, node.assumptions.iter()));
                }
            }
        }
    }

    None
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
