// src/sched/run.rs

//! Per-run state and event routing.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::cancel::CancelToken;
use crate::graph::{BuiltGraph, PassNode};
use crate::pass::{PassId, PassPayload};
use crate::sched::executor::{ApplyJob, ExecShared};
use crate::sched::worker;
use crate::types::{RunId, Span, TargetId};

/// State owned by one run: its token, its node arena, and the countdown to
/// completion.
///
/// A `RunCore` is created per launch and dropped wholesale once the last
/// handle to it goes away; nothing inside is reused by later runs.
pub(crate) struct RunCore {
    id: RunId,
    target: TargetId,
    span: Span,
    token: CancelToken,
    graph: BuiltGraph,
    /// Nodes not yet applied. The run finishes when this reaches zero.
    outstanding: AtomicUsize,
    /// Join handles of submitted collect jobs; aborted on cancellation so
    /// queued jobs never start.
    collect_handles: Mutex<Vec<JoinHandle<()>>>,
    shared: Arc<ExecShared>,
}

impl RunCore {
    pub(crate) fn new(
        id: RunId,
        target: TargetId,
        span: Span,
        graph: BuiltGraph,
        shared: Arc<ExecShared>,
    ) -> Arc<Self> {
        let outstanding = AtomicUsize::new(graph.node_count());
        Arc::new(Self {
            id,
            target,
            span,
            token: CancelToken::new(),
            graph,
            outstanding,
            collect_handles: Mutex::new(Vec::new()),
            shared,
        })
    }

    pub(crate) fn id(&self) -> RunId {
        self.id
    }

    pub(crate) fn target(&self) -> &TargetId {
        &self.target
    }

    pub(crate) fn token(&self) -> &CancelToken {
        &self.token
    }

    fn lock_handles(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.collect_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Submit every node whose counter started at zero. Empty graphs finish
    /// on the spot.
    pub(crate) fn start_immediate(self: &Arc<Self>) {
        if self.graph.is_empty() {
            self.finish();
            return;
        }
        for &id in self.graph.immediate() {
            self.submit(id);
        }
    }

    /// Queue one node's collect job on the blocking pool.
    fn submit(self: &Arc<Self>, id: PassId) {
        if !self.token.is_running() {
            trace!(
                target = %self.target,
                run_id = self.id.0,
                pass = %id,
                "submit skipped, run is not running"
            );
            return;
        }
        let Some(node) = self.graph.node(id) else {
            debug_assert!(false, "submitted pass {id} missing from run graph");
            error!(
                target = %self.target,
                run_id = self.id.0,
                pass = %id,
                "submitted pass missing from run graph, canceling run"
            );
            self.cancel("internal error: pass missing from run graph");
            return;
        };
        let run = Arc::clone(self);
        let node = Arc::clone(node);
        let handle = self
            .shared
            .runtime()
            .spawn_blocking(move || worker::run_collect(run, node));
        self.lock_handles().push(handle);
    }

    /// Decrement `succ`'s predecessor counter; a counter hitting zero
    /// submits the node.
    ///
    /// A decrement past zero means the graph was malformed, which graph
    /// construction is supposed to make impossible; it is reported as a bug
    /// and the run is canceled.
    pub(crate) fn release(self: &Arc<Self>, succ: PassId, released_by: PassId) {
        let Some(node) = self.graph.node(succ) else {
            debug_assert!(false, "pass {released_by} releases unknown pass {succ}");
            error!(
                target = %self.target,
                run_id = self.id.0,
                pass = %succ,
                by = %released_by,
                "released pass missing from run graph, canceling run"
            );
            self.cancel("internal error: released pass missing from run graph");
            return;
        };
        match node.decrement() {
            0 => {
                debug_assert!(false, "counter underflow on pass {succ}");
                error!(
                    target = %self.target,
                    run_id = self.id.0,
                    pass = %succ,
                    by = %released_by,
                    "predecessor counter underflow, canceling run"
                );
                self.cancel("internal error: predecessor counter underflow");
            }
            1 => self.submit(succ),
            _ => {}
        }
    }

    /// Hand a collected payload to the serialized apply queue. Blocks the
    /// calling worker when the queue is full.
    pub(crate) fn enqueue_apply(self: &Arc<Self>, node: Arc<PassNode>, payload: PassPayload) {
        let job = ApplyJob {
            run: Arc::clone(self),
            node,
            payload,
        };
        if self.shared.apply_tx().blocking_send(job).is_err() {
            // The consumer is gone, so the scheduler is shutting down.
            warn!(
                target = %self.target,
                run_id = self.id.0,
                "apply queue closed, canceling run"
            );
            self.cancel("apply queue closed");
        }
    }

    /// Post-apply bookkeeping for one node: mark it up to date, release its
    /// on-completion successors, then count it off.
    ///
    /// A run canceled while the apply was in flight skips the mark: the
    /// cancellation usually carries a newer edit, and a late mark would hide
    /// this pass from the run that follows.
    pub(crate) fn note_applied(self: &Arc<Self>, node: &PassNode) {
        if self.token.is_running() {
            if let Some(tracker) = self.shared.tracker() {
                tracker.mark_up_to_date(node.id(), self.span);
            }
        } else {
            trace!(
                target = %self.target,
                run_id = self.id.0,
                pass = %node.id(),
                "up-to-date mark skipped, run is not running"
            );
        }
        for &succ in node.on_completion() {
            self.release(succ, node.id());
        }
        let prev = self.outstanding.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "run countdown underflow");
        if prev == 1 {
            self.finish();
        }
    }

    fn finish(self: &Arc<Self>) {
        if self.token.stop() {
            debug!(target = %self.target, run_id = self.id.0, "run finished");
            self.shared.fire_finished(&self.target, self.id);
        }
    }

    /// Cancel the run. Idempotent; only the winning call aborts queued
    /// collect jobs and fires the listener event.
    pub(crate) fn cancel(self: &Arc<Self>, reason: &str) {
        self.cancel_run(reason, None);
    }

    /// Cancel the run because `pass` failed. The failure is logged once at
    /// error level and recorded as the cancellation cause.
    pub(crate) fn cancel_failed(self: &Arc<Self>, pass: PassId, phase: &str, err: anyhow::Error) {
        if self.token.is_canceled() {
            // The run was already torn down; a late failure is expected
            // noise from a worker that was mid-flight.
            debug!(
                target = %self.target,
                run_id = self.id.0,
                pass = %pass,
                phase,
                error = %err,
                "pass failed after run cancellation"
            );
            return;
        }
        error!(
            target = %self.target,
            run_id = self.id.0,
            pass = %pass,
            phase,
            error = %err,
            "pass failed, canceling run"
        );
        let reason = format!("pass {pass} failed during {phase}");
        self.cancel_run(&reason, Some(err));
    }

    fn cancel_run(self: &Arc<Self>, reason: &str, cause: Option<anyhow::Error>) {
        let won = match cause {
            Some(source) => self.token.cancel_with_cause(source, reason),
            None => self.token.cancel(reason),
        };
        if !won {
            return;
        }
        debug!(target = %self.target, run_id = self.id.0, reason, "run canceled");
        let handles = std::mem::take(&mut *self.lock_handles());
        for handle in handles {
            handle.abort();
        }
        self.shared.fire_canceled(&self.target, self.id, reason);
    }
}

/// Cloneable handle to a run.
///
/// Holding a handle keeps the run's arena alive; dropping the last one frees
/// it. All methods are safe to call at any point in the run's life.
#[derive(Clone)]
pub struct RunHandle {
    core: Arc<RunCore>,
}

impl RunHandle {
    pub(crate) fn new(core: Arc<RunCore>) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &Arc<RunCore> {
        &self.core
    }

    pub fn id(&self) -> RunId {
        self.core.id
    }

    pub fn target(&self) -> &TargetId {
        &self.core.target
    }

    /// The span this run was launched over.
    pub fn span(&self) -> Span {
        self.core.span
    }

    /// The run's cancellation token, for checkpoints and cause inspection.
    pub fn token(&self) -> &CancelToken {
        &self.core.token
    }

    /// True while the run is neither canceled nor finished.
    pub fn is_live(&self) -> bool {
        self.core.token.is_running()
    }

    /// Cancel the run. Idempotent; the first reason wins.
    pub fn cancel(&self, reason: &str) {
        self.core.cancel(reason);
    }
}

impl fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunHandle")
            .field("id", &self.core.id)
            .field("target", &self.core.target)
            .field("state", &self.core.token.state())
            .finish()
    }
}
