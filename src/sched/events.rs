// src/sched/events.rs

//! Run lifecycle notifications.

use crate::types::{RunId, TargetId};

/// Observer for run lifecycle events.
///
/// Implementations are registered on the scheduler service via
/// [`PassScheduler::add_listener`](crate::sched::PassScheduler::add_listener)
/// and invoked outside any scheduler lock, on whichever thread drove the
/// transition. Exactly one of `run_canceled` / `run_finished` fires per run.
///
/// Callbacks should return quickly and must not block on the scheduler.
pub trait RunListener: Send + Sync {
    /// A run was launched for `target`.
    fn run_started(&self, _target: &TargetId, _run: RunId) {}

    /// The run was canceled (superseded, paused, failed, or shut down);
    /// `reason` is the first recorded cancellation reason.
    fn run_canceled(&self, _target: &TargetId, _run: RunId, _reason: &str) {}

    /// Every node of the run was applied.
    fn run_finished(&self, _target: &TargetId, _run: RunId) {}
}
