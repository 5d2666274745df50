// src/dirty.rs

//! Consumed-only interface to the dirty-region bookkeeping.
//!
//! Which passes need to run is not this crate's decision: the restart
//! coordinator asks the tracker whether a pass is already up to date for
//! the requested span before building a node for it, and the scheduler
//! marks a pass up to date for the run's span once its apply phase
//! succeeds. Production implementations live with the document model.

use crate::pass::PassId;
use crate::types::Span;

pub trait DirtyRegionTracker: Send + Sync {
    /// Whether `pass` has nothing left to analyze inside `span`.
    fn is_up_to_date(&self, pass: PassId, span: Span) -> bool;

    /// Record that `pass` has analyzed everything inside `span`.
    fn mark_up_to_date(&self, pass: PassId, span: Span);
}
