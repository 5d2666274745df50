// src/lib.rs

pub mod cancel;
pub mod config;
pub mod dirty;
pub mod errors;
pub mod graph;
pub mod logging;
pub mod pass;
pub mod restart;
pub mod sched;
pub mod types;

use std::sync::Arc;

use crate::config::{validate_config, DaemonConfig};
use crate::dirty::DirtyRegionTracker;
use crate::errors::Result;
use crate::pass::PassSource;
use crate::restart::RestartCoordinator;
use crate::sched::{PassScheduler, RunHandle, RunListener};
use crate::types::{Span, TargetId};

/// High-level entry point used by embedding daemons.
///
/// This wires together:
/// - config validation
/// - the scheduler service (apply consumer, per-target run registry)
/// - the restart coordinator (debounce state machine + shell task)
///
/// `source` supplies the pass set for a target each time a run starts.
/// `tracker`, when given, filters already up-to-date passes out of new runs
/// and is told about each successfully applied pass.
///
/// Must be called from within a Tokio runtime; the scheduler's apply
/// consumer and the coordinator task are spawned onto it.
pub fn start(
    cfg: &DaemonConfig,
    source: Arc<dyn PassSource>,
    tracker: Option<Arc<dyn DirtyRegionTracker>>,
) -> Result<Daemon> {
    validate_config(cfg)?;

    let scheduler = PassScheduler::new(&cfg.scheduler, tracker);
    let coordinator = RestartCoordinator::spawn(&cfg.restart, Arc::clone(&scheduler), source);

    Ok(Daemon {
        scheduler,
        coordinator,
    })
}

/// A wired-up scheduler plus restart coordinator.
///
/// Restart requests go through the debouncing coordinator; direct launches
/// and listener registration go through [`Daemon::scheduler`].
pub struct Daemon {
    scheduler: Arc<PassScheduler>,
    coordinator: RestartCoordinator,
}

impl Daemon {
    /// The underlying scheduler service.
    pub fn scheduler(&self) -> &Arc<PassScheduler> {
        &self.scheduler
    }

    /// Register a run lifecycle listener.
    pub fn add_listener(&self, listener: Arc<dyn RunListener>) {
        self.scheduler.add_listener(listener);
    }

    /// Request a debounced restart for `target`; see
    /// [`RestartCoordinator::request_restart`].
    pub fn request_restart(&self, target: TargetId, span: Span, reason: impl Into<String>) {
        self.coordinator.request_restart(target, span, reason);
    }

    /// Start a run for `target` immediately, skipping the debounce delay.
    pub fn run_now(&self, target: TargetId) {
        self.coordinator.run_now(target);
    }

    /// Increment the pause refcount; see [`RestartCoordinator::pause`].
    pub fn pause(&self) {
        self.coordinator.pause();
    }

    /// Decrement the pause refcount; see [`RestartCoordinator::resume`].
    pub fn resume(&self) {
        self.coordinator.resume();
    }

    /// The latest run registered for `target`, live or not.
    pub fn current_run(&self, target: &TargetId) -> Option<RunHandle> {
        self.scheduler.current_run(target)
    }

    /// Stop the coordinator task and cancel live runs.
    pub async fn shutdown(&self) {
        self.coordinator.shutdown().await;
    }
}
