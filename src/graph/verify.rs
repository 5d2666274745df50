// src/graph/verify.rs

//! Consistency checking for freshly built graphs.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::graph::build::BuiltGraph;
use crate::pass::PassId;

/// Simulate one full run over the graph and verify the counters line up.
///
/// Checks that:
/// - the initial counters sum to the number of registered edges,
/// - starting from the immediate-submit set, every node is released exactly
///   once,
/// - no counter is decremented below zero.
///
/// Pure bookkeeping over a snapshot; the nodes' real counters are not
/// touched. [`build_graph`](crate::graph::build_graph) runs this
/// automatically in debug builds.
pub fn check_consistency(graph: &BuiltGraph) -> Result<(), String> {
    let mut counters: HashMap<PassId, u32> = HashMap::with_capacity(graph.node_count());
    let mut total: u64 = 0;
    for node in graph.nodes() {
        counters.insert(node.id(), node.pending());
        total += u64::from(node.pending());
    }

    if total != graph.edge_count() as u64 {
        return Err(format!(
            "counters sum to {} but {} edges were registered",
            total,
            graph.edge_count()
        ));
    }

    let mut visited: HashSet<PassId> = HashSet::with_capacity(graph.node_count());
    let mut queue: VecDeque<PassId> = graph.immediate().iter().copied().collect();

    while let Some(id) = queue.pop_front() {
        if !visited.insert(id) {
            return Err(format!("pass {id} released more than once"));
        }
        let Some(node) = graph.node(id) else {
            return Err(format!("released pass {id} is not in the graph"));
        };
        for &succ in node.on_submit().iter().chain(node.on_completion()) {
            let Some(counter) = counters.get_mut(&succ) else {
                return Err(format!("pass {id} releases unknown pass {succ}"));
            };
            if *counter == 0 {
                return Err(format!(
                    "counter of pass {succ} underflows when released by {id}"
                ));
            }
            *counter -= 1;
            if *counter == 0 {
                queue.push_back(succ);
            }
        }
    }

    if visited.len() != graph.node_count() {
        return Err(format!(
            "{} of {} passes are unreachable from the immediate-submit set",
            graph.node_count() - visited.len(),
            graph.node_count()
        ));
    }

    Ok(())
}
