// src/restart/coordinator.rs

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::config::RestartConfig;
use crate::pass::PassSource;
use crate::restart::core::{CoordCommand, CoordEvent, DebounceCore};
use crate::sched::{PassScheduler, RunListener};
use crate::types::{RunId, Span, TargetId};

/// Drives the debounce state machine in response to [`CoordEvent`]s and
/// executes its commands against the scheduler.
///
/// This is a pure IO shell around [`DebounceCore`], which contains all the
/// restart policy. The shell reads events from its control channel, arms a
/// single timer for the earliest pending deadline, and launches or cancels
/// runs.
struct CoordinatorTask {
    core: DebounceCore,
    event_rx: mpsc::UnboundedReceiver<CoordEvent>,
    scheduler: Arc<PassScheduler>,
    source: Arc<dyn PassSource>,
}

impl CoordinatorTask {
    /// Main event loop.
    async fn run(mut self) {
        info!("restart coordinator started");

        loop {
            let event = match self.core.next_deadline() {
                Some(deadline) => {
                    tokio::select! {
                        event = self.event_rx.recv() => event,
                        _ = time::sleep_until(time::Instant::from_std(deadline)) => {
                            Some(CoordEvent::TimerFired)
                        }
                    }
                }
                None => self.event_rx.recv().await,
            };

            let Some(event) = event else {
                debug!("coordinator channel closed; exiting");
                break;
            };

            debug!(?event, "coordinator received event");

            let step = self.core.step(Instant::now(), event);
            self.execute(step.commands);

            if !step.keep_running {
                info!("coordinator shutdown requested; stopping");
                break;
            }
        }

        // Leave nothing running behind the coordinator.
        self.scheduler.cancel_all("coordinator shutdown");
        info!("restart coordinator stopped");
    }

    fn execute(&mut self, commands: Vec<CoordCommand>) {
        for command in commands {
            match command {
                CoordCommand::CancelRun {
                    target,
                    run,
                    reason,
                } => self.cancel_run(&target, run, &reason),
                CoordCommand::StartRun {
                    target,
                    span,
                    reason,
                } => self.start_run(target, span, reason),
            }
        }
    }

    /// Cancel `run` unless the target has already moved on to a newer one.
    fn cancel_run(&self, target: &TargetId, run: RunId, reason: &str) {
        if let Some(handle) = self.scheduler.current_run(target) {
            if handle.id() == run {
                handle.cancel(reason);
            }
        }
    }

    /// Build the pass set for `target` and launch it, feeding the outcome
    /// straight back into the core.
    fn start_run(&mut self, target: TargetId, span: Span, reason: String) {
        let mut passes = self.source.passes_for(&target);
        if let Some(tracker) = self.scheduler.tracker() {
            passes.retain(|pass| !tracker.is_up_to_date(pass.id(), span));
        }

        debug!(
            target = %target,
            passes = passes.len(),
            span = ?span,
            reason = %reason,
            "starting run"
        );

        match self.scheduler.launch(target.clone(), span, passes) {
            Ok(handle) => {
                let step = self.core.step(
                    Instant::now(),
                    CoordEvent::RunLaunched {
                        target,
                        run: handle.id(),
                    },
                );
                self.execute(step.commands);
            }
            Err(err) => {
                error!(target = %target, error = %err, "failed to launch run");
                let step = self
                    .core
                    .step(Instant::now(), CoordEvent::LaunchFailed { target });
                self.execute(step.commands);
            }
        }
    }
}

/// Forwards run lifecycle events from the scheduler into the coordinator's
/// control channel.
struct CoordFeedback {
    event_tx: mpsc::UnboundedSender<CoordEvent>,
}

impl RunListener for CoordFeedback {
    fn run_canceled(&self, target: &TargetId, run: RunId, _reason: &str) {
        let _ = self.event_tx.send(CoordEvent::RunEnded {
            target: target.clone(),
            run,
            canceled: true,
        });
    }

    fn run_finished(&self, target: &TargetId, run: RunId) {
        let _ = self.event_tx.send(CoordEvent::RunEnded {
            target: target.clone(),
            run,
            canceled: false,
        });
    }
}

/// Handle to a running coordinator task.
///
/// All request methods are cheap, synchronous, and callable from any thread;
/// they enqueue an event for the background task. Call [`shutdown`] to stop
/// the task; dropping the handle without it leaves the task parked on its
/// channel until the runtime shuts down.
///
/// [`shutdown`]: RestartCoordinator::shutdown
pub struct RestartCoordinator {
    event_tx: mpsc::UnboundedSender<CoordEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RestartCoordinator {
    /// Spawn the coordinator task and register its run lifecycle feedback
    /// listener on the scheduler.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        cfg: &RestartConfig,
        scheduler: Arc<PassScheduler>,
        source: Arc<dyn PassSource>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel::<CoordEvent>();

        scheduler.add_listener(Arc::new(CoordFeedback {
            event_tx: event_tx.clone(),
        }));

        let task = CoordinatorTask {
            core: DebounceCore::new(cfg.debounce()),
            event_rx,
            scheduler,
            source,
        };
        let handle = tokio::spawn(task.run());

        Self {
            event_tx,
            task: Mutex::new(Some(handle)),
        }
    }

    /// Request a debounced restart for `target`.
    ///
    /// Cancels the target's live run, if any, and pushes the next allowed
    /// start out to now plus the debounce window. Requests within the window
    /// coalesce: spans merge by union and the latest reason wins.
    pub fn request_restart(&self, target: TargetId, span: Span, reason: impl Into<String>) {
        let _ = self.event_tx.send(CoordEvent::Restart {
            target,
            span,
            reason: reason.into(),
        });
    }

    /// Start a run for `target` immediately, skipping the debounce delay.
    pub fn run_now(&self, target: TargetId) {
        let _ = self.event_tx.send(CoordEvent::RunNow { target });
    }

    /// Increment the pause refcount. Going above zero cancels live runs and
    /// stops new ones from starting; recorded requests are kept.
    pub fn pause(&self) {
        let _ = self.event_tx.send(CoordEvent::Pause);
    }

    /// Decrement the pause refcount. Hitting zero reschedules every target
    /// with a recorded request.
    pub fn resume(&self) {
        let _ = self.event_tx.send(CoordEvent::Resume);
    }

    /// Stop the coordinator task, canceling live runs. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.event_tx.send(CoordEvent::Shutdown);
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.await.is_err() {
                warn!("coordinator task panicked during shutdown");
            }
        }
    }
}
