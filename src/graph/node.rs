// src/graph/node.rs

//! Frozen per-run pass nodes.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::pass::{Pass, PassId};

/// How a pass participates in the run's ordering.
///
/// Resolved once at graph build and never changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// The pass declared no predecessors at all; it is submitted as soon as
    /// the run starts.
    Free,
    /// The pass declared at least one predecessor (even if none of them
    /// resolved within this run's pass set).
    Ordered,
}

/// One pass inside a run's graph.
///
/// Everything except the `pending` counter is frozen after
/// [`build_graph`](crate::graph::build_graph) returns. The counter is only
/// ever decremented, once per resolved predecessor edge, by the run driving
/// the graph.
pub struct PassNode {
    id: PassId,
    kind: NodeKind,
    pass: Arc<dyn Pass>,
    /// Number of resolved predecessor edges that have not released this
    /// node yet. The node is submitted when this reaches zero.
    pending: AtomicU32,
    /// Successors released when this node's `collect` starts
    /// (starting-predecessor edges point here).
    on_submit: Vec<PassId>,
    /// Successors released when this node's `apply` completes
    /// (completion-predecessor edges point here).
    on_completion: Vec<PassId>,
}

impl PassNode {
    pub(crate) fn new(
        id: PassId,
        kind: NodeKind,
        pass: Arc<dyn Pass>,
        pending: u32,
        on_submit: Vec<PassId>,
        on_completion: Vec<PassId>,
    ) -> Self {
        Self {
            id,
            kind,
            pass,
            pending: AtomicU32::new(pending),
            on_submit,
            on_completion,
        }
    }

    pub fn id(&self) -> PassId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn pass(&self) -> &Arc<dyn Pass> {
        &self.pass
    }

    /// Successor ids released when this node's collect starts.
    pub fn on_submit(&self) -> &[PassId] {
        &self.on_submit
    }

    /// Successor ids released when this node's apply completes.
    pub fn on_completion(&self) -> &[PassId] {
        &self.on_completion
    }

    /// Current counter value, for diagnostics and tests.
    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::Acquire)
    }

    /// Decrement the predecessor counter and return the **previous** value.
    ///
    /// - previous `1`: the counter just hit zero, the caller must submit
    ///   this node.
    /// - previous `0`: underflow; the graph was malformed (a bug, reported
    ///   by the caller).
    pub(crate) fn decrement(&self) -> u32 {
        self.pending.fetch_sub(1, Ordering::AcqRel)
    }
}

impl fmt::Debug for PassNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassNode")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("pending", &self.pending())
            .field("on_submit", &self.on_submit)
            .field("on_completion", &self.on_completion)
            .finish()
    }
}
