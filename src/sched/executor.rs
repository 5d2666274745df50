// src/sched/executor.rs

//! The scheduler service.
//!
//! Owns the per-target run registry (one live run per target) and the
//! single apply consumer that serializes the apply phases of every run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use anyhow::anyhow;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::config::SchedulerConfig;
use crate::dirty::DirtyRegionTracker;
use crate::errors::Result;
use crate::graph::{build_graph, PassNode};
use crate::pass::{Pass, PassPayload};
use crate::sched::events::RunListener;
use crate::sched::run::{RunCore, RunHandle};
use crate::sched::worker::panic_message;
use crate::types::{RunId, Span, TargetId};

/// One successfully collected node waiting for its serialized apply.
pub(crate) struct ApplyJob {
    pub(crate) run: Arc<RunCore>,
    pub(crate) node: Arc<PassNode>,
    pub(crate) payload: PassPayload,
}

/// State shared between the scheduler service, its runs, and the apply
/// consumer.
pub(crate) struct ExecShared {
    /// Runtime the service was created on; collect jobs go to its blocking
    /// pool.
    runtime: Handle,
    apply_tx: mpsc::Sender<ApplyJob>,
    listeners: RwLock<Vec<Arc<dyn RunListener>>>,
    tracker: Option<Arc<dyn DirtyRegionTracker>>,
}

impl ExecShared {
    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub(crate) fn apply_tx(&self) -> &mpsc::Sender<ApplyJob> {
        &self.apply_tx
    }

    pub(crate) fn tracker(&self) -> Option<&Arc<dyn DirtyRegionTracker>> {
        self.tracker.as_ref()
    }

    fn listeners_snapshot(&self) -> Vec<Arc<dyn RunListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn fire_started(&self, target: &TargetId, run: RunId) {
        for listener in self.listeners_snapshot() {
            listener.run_started(target, run);
        }
    }

    pub(crate) fn fire_canceled(&self, target: &TargetId, run: RunId, reason: &str) {
        for listener in self.listeners_snapshot() {
            listener.run_canceled(target, run, reason);
        }
    }

    pub(crate) fn fire_finished(&self, target: &TargetId, run: RunId) {
        for listener in self.listeners_snapshot() {
            listener.run_finished(target, run);
        }
    }
}

/// The scheduler service.
///
/// Launches runs, enforces single-flight per target, and funnels every apply
/// phase through one consumer task so that no two applies ever overlap, not
/// even across targets.
pub struct PassScheduler {
    shared: Arc<ExecShared>,
    run_seq: AtomicU64,
    targets: Mutex<HashMap<TargetId, RunHandle>>,
}

impl PassScheduler {
    /// Create the service and spawn its apply consumer.
    ///
    /// Must be called from within a Tokio runtime; collect jobs run on that
    /// runtime's blocking pool.
    pub fn new(
        cfg: &SchedulerConfig,
        tracker: Option<Arc<dyn DirtyRegionTracker>>,
    ) -> Arc<Self> {
        let (apply_tx, apply_rx) = mpsc::channel::<ApplyJob>(cfg.apply_queue_depth);
        let runtime = Handle::current();
        runtime.spawn(apply_loop(apply_rx));

        info!(
            apply_queue_depth = cfg.apply_queue_depth,
            "pass scheduler started"
        );

        Arc::new(Self {
            shared: Arc::new(ExecShared {
                runtime,
                apply_tx,
                listeners: RwLock::new(Vec::new()),
                tracker,
            }),
            run_seq: AtomicU64::new(1),
            targets: Mutex::new(HashMap::new()),
        })
    }

    /// Register a run lifecycle listener. Listeners are never removed.
    pub fn add_listener(&self, listener: Arc<dyn RunListener>) {
        self.shared
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// The dirty-region tracker this service was configured with, if any.
    pub fn tracker(&self) -> Option<&Arc<dyn DirtyRegionTracker>> {
        self.shared.tracker.as_ref()
    }

    /// Launch a run for `target` over the given passes.
    ///
    /// The graph is built and validated first; a malformed pass set fails
    /// here and no run starts. Any previous run registered for the same
    /// target is canceled as superseded. An empty pass set yields a run that
    /// completes immediately.
    pub fn launch(
        &self,
        target: TargetId,
        span: Span,
        passes: Vec<Arc<dyn Pass>>,
    ) -> Result<RunHandle> {
        let graph = build_graph(&passes)?;

        let id = RunId(self.run_seq.fetch_add(1, Ordering::Relaxed));
        let core = RunCore::new(id, target.clone(), span, graph, Arc::clone(&self.shared));
        let handle = RunHandle::new(core);
        handle.token().start();

        let previous = {
            let mut targets = self
                .targets
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            targets.insert(target.clone(), handle.clone())
        };
        // Cancel outside the registry lock; listeners fire from within.
        if let Some(previous) = previous {
            if previous.is_live() {
                debug!(
                    target = %target,
                    run_id = previous.id().0,
                    superseded_by = id.0,
                    "canceling superseded run"
                );
                previous.cancel("superseded by a newer run");
            }
        }

        debug!(
            target = %target,
            run_id = id.0,
            passes = passes.len(),
            "run started"
        );
        self.shared.fire_started(&target, id);
        handle.core().start_immediate();

        Ok(handle)
    }

    /// The latest run registered for `target`, live or not.
    pub fn current_run(&self, target: &TargetId) -> Option<RunHandle> {
        self.targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
            .cloned()
    }

    /// Cancel every registered run. Used on pause and shutdown.
    pub fn cancel_all(&self, reason: &str) {
        let handles: Vec<RunHandle> = {
            let targets = self
                .targets
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            targets.values().cloned().collect()
        };
        for handle in handles {
            handle.cancel(reason);
        }
    }
}

/// The single apply consumer. Collected nodes from all runs funnel through
/// here, one `apply` at a time.
async fn apply_loop(mut rx: mpsc::Receiver<ApplyJob>) {
    debug!("apply consumer started");
    while let Some(job) = rx.recv().await {
        handle_apply_job(job).await;
    }
    debug!("apply consumer finished (queue closed)");
}

async fn handle_apply_job(job: ApplyJob) {
    let ApplyJob { run, node, payload } = job;
    let id = node.id();

    // Cancellation may have raced the queue; never apply for a dead run.
    if run.token().check().is_err() {
        trace!(
            target = %run.target(),
            run_id = run.id().0,
            pass = %id,
            "apply skipped, run canceled"
        );
        return;
    }

    let pass = Arc::clone(node.pass());
    let started = Instant::now();
    let result = tokio::task::spawn_blocking(move || pass.apply(payload)).await;

    match result {
        Ok(Ok(())) => {
            debug!(
                target = %run.target(),
                run_id = run.id().0,
                pass = %id,
                elapsed = ?started.elapsed(),
                "apply finished"
            );
            run.note_applied(&node);
        }
        Ok(Err(err)) => {
            run.cancel_failed(id, "apply", err);
        }
        Err(join_err) if join_err.is_panic() => {
            let msg = panic_message(join_err.into_panic());
            run.cancel_failed(id, "apply", anyhow!("apply panicked: {msg}"));
        }
        Err(_) => {
            // Aborted, which only happens at runtime shutdown.
            debug!(
                target = %run.target(),
                run_id = run.id().0,
                pass = %id,
                "apply task aborted"
            );
        }
    }
}
