// src/graph/build.rs

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::{debug, trace};

use crate::errors::{PassdagError, Result};
use crate::graph::node::{NodeKind, PassNode};
use crate::pass::{Pass, PassId};

/// A validated, frozen pass graph for one run.
///
/// Owns every [`PassNode`] of the run; dropping the graph drops the whole
/// arena at once. Nothing in here is reused across runs.
#[derive(Debug)]
pub struct BuiltGraph {
    nodes: HashMap<PassId, Arc<PassNode>>,
    /// Ids whose initial counter is zero, in the order the passes were given.
    immediate: Vec<PassId>,
    /// Number of registered (resolved) predecessor edges.
    edges: usize,
}

impl BuiltGraph {
    pub fn node(&self, id: PassId) -> Option<&Arc<PassNode>> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<PassNode>> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids to submit as soon as the run starts.
    pub fn immediate(&self) -> &[PassId] {
        &self.immediate
    }
}

/// Which successor list a resolved edge lands in.
#[derive(Clone, Copy)]
enum Release {
    /// Starting-predecessor edge: released when the predecessor's collect
    /// starts.
    AtSubmit,
    /// Completion-predecessor edge: released when the predecessor's apply
    /// completes.
    AtCompletion,
}

struct NodeBuilder {
    pass: Arc<dyn Pass>,
    kind: NodeKind,
    pending: u32,
    on_submit: Vec<PassId>,
    on_completion: Vec<PassId>,
}

/// Build a frozen graph from the given passes.
///
/// Steps:
/// 1. Materialize one node per pass, rejecting the unassigned sentinel id
///    and duplicate ids.
/// 2. Wire edges from the declared predecessor lists: a
///    completion-predecessor registers the declaring pass in the
///    predecessor's on-completion list, a starting-predecessor in its
///    on-submit list, and each registration bumps the declaring pass's
///    counter. Predecessor ids that do not resolve within this pass set
///    register nothing (the usual case when an up-to-date pass was filtered
///    out beforehand).
/// 3. Reject cyclic declarations, in all build profiles.
/// 4. Freeze the nodes and collect the immediate-submit set.
pub fn build_graph(passes: &[Arc<dyn Pass>]) -> Result<BuiltGraph> {
    let mut builders: HashMap<PassId, NodeBuilder> = HashMap::with_capacity(passes.len());
    let mut order: Vec<PassId> = Vec::with_capacity(passes.len());

    for pass in passes {
        let id = pass.id();
        if !id.is_assigned() {
            return Err(PassdagError::UnassignedPassId(id));
        }
        let kind = if pass.completion_predecessors().is_empty()
            && pass.starting_predecessors().is_empty()
        {
            NodeKind::Free
        } else {
            NodeKind::Ordered
        };
        let builder = NodeBuilder {
            pass: Arc::clone(pass),
            kind,
            pending: 0,
            on_submit: Vec::new(),
            on_completion: Vec::new(),
        };
        if builders.insert(id, builder).is_some() {
            return Err(PassdagError::DuplicatePassId(id));
        }
        order.push(id);
    }

    // Collect resolved edges first; registering them mutates two builder
    // entries per edge.
    let mut resolved: Vec<(PassId, PassId, Release)> = Vec::new();
    for pass in passes {
        let id = pass.id();
        for &pred in pass.completion_predecessors() {
            if pred == id {
                return Err(PassdagError::DependencyCycle(id));
            }
            if builders.contains_key(&pred) {
                resolved.push((pred, id, Release::AtCompletion));
            } else {
                trace!(pass = %id, pred = %pred, "completion predecessor not in this run, skipping");
            }
        }
        for &pred in pass.starting_predecessors() {
            if pred == id {
                return Err(PassdagError::DependencyCycle(id));
            }
            if builders.contains_key(&pred) {
                resolved.push((pred, id, Release::AtSubmit));
            } else {
                trace!(pass = %id, pred = %pred, "starting predecessor not in this run, skipping");
            }
        }
    }

    // Cycle check over the resolved edges. A topological sort fails exactly
    // when there is a cycle. Self-references were rejected above, so the
    // graph map never sees a self-loop.
    let mut digraph: DiGraphMap<PassId, ()> = DiGraphMap::new();
    for &id in &order {
        digraph.add_node(id);
    }
    for &(pred, succ, _) in &resolved {
        digraph.add_edge(pred, succ, ());
    }
    if let Err(cycle) = toposort(&digraph, None) {
        return Err(PassdagError::DependencyCycle(cycle.node_id()));
    }

    let mut edges = 0usize;
    for &(pred, succ, release) in &resolved {
        if let Some(pred_builder) = builders.get_mut(&pred) {
            match release {
                Release::AtSubmit => pred_builder.on_submit.push(succ),
                Release::AtCompletion => pred_builder.on_completion.push(succ),
            }
        }
        if let Some(succ_builder) = builders.get_mut(&succ) {
            succ_builder.pending += 1;
        }
        edges += 1;
    }

    let mut nodes: HashMap<PassId, Arc<PassNode>> = HashMap::with_capacity(order.len());
    let mut immediate: Vec<PassId> = Vec::new();
    for &id in &order {
        if let Some(b) = builders.remove(&id) {
            if b.pending == 0 {
                immediate.push(id);
            }
            let node = PassNode::new(id, b.kind, b.pass, b.pending, b.on_submit, b.on_completion);
            nodes.insert(id, Arc::new(node));
        }
    }

    let built = BuiltGraph {
        nodes,
        immediate,
        edges,
    };

    #[cfg(debug_assertions)]
    if let Err(msg) = crate::graph::verify::check_consistency(&built) {
        panic!("pass graph failed consistency check: {msg}");
    }

    debug!(
        nodes = built.node_count(),
        edges = built.edge_count(),
        immediate = built.immediate.len(),
        "built pass graph"
    );

    Ok(built)
}
