// src/restart/core.rs

//! Pure debounce state machine.
//!
//! This module contains a synchronous, deterministic core that consumes
//! timestamped [`CoordEvent`]s and produces:
//! - an updated per-target state
//! - a list of [`CoordCommand`]s describing what the IO shell should do next
//!
//! The async shell (`restart::coordinator`) is responsible for:
//! - reading events from its control channel
//! - arming a timer for [`DebounceCore::next_deadline`]
//! - canceling and launching runs through the scheduler
//!
//! The core has **no** channels, no Tokio types, and never reads the clock,
//! so the whole restart policy is testable with synthetic instants.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::types::{RunId, Span, TargetId};

/// Coalesced restart-request state for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyRecord {
    /// Union of the spans of all coalesced requests.
    pub span: Span,
    /// Reason of the latest request; carried into the next run.
    pub reason: String,
}

/// Per-target phase of the debounce state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing to do for this target.
    Idle,
    /// A request is recorded; a run may start once `deadline` has passed.
    Pending { deadline: Instant },
    /// A start command was emitted; waiting for the launch outcome.
    Launching,
    /// A run is in flight.
    Running { run: RunId },
}

/// Events flowing into the core from the public handle, the run lifecycle
/// listener, and the shell's timer.
#[derive(Debug, Clone)]
pub enum CoordEvent {
    /// An external restart request.
    Restart {
        target: TargetId,
        span: Span,
        reason: String,
    },
    /// Start a run for `target` immediately, skipping the debounce delay.
    RunNow { target: TargetId },
    /// Increment the pause refcount; going above zero cancels live runs.
    Pause,
    /// Decrement the pause refcount; hitting zero reschedules dirty targets.
    Resume,
    /// The shell launched a run for `target`.
    RunLaunched { target: TargetId, run: RunId },
    /// The shell failed to launch a run for `target`.
    LaunchFailed { target: TargetId },
    /// A run ended, either canceled or finished.
    RunEnded {
        target: TargetId,
        run: RunId,
        canceled: bool,
    },
    /// The earliest pending deadline elapsed.
    TimerFired,
    /// Graceful coordinator shutdown.
    Shutdown,
}

/// Command produced by the core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordCommand {
    /// Cancel the identified run if it is still the target's current one.
    CancelRun {
        target: TargetId,
        run: RunId,
        reason: String,
    },
    /// Launch a run for `target` over `span`.
    StartRun {
        target: TargetId,
        span: Span,
        reason: String,
    },
}

/// Decision returned by the core after handling a single [`CoordEvent`].
#[derive(Debug, Clone)]
pub struct CoordStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoordCommand>,
    /// Whether the outer coordinator loop should keep running.
    pub keep_running: bool,
}

#[derive(Debug)]
struct TargetState {
    phase: Phase,
    /// Requests recorded while debouncing, paused, or running.
    dirty: Option<DirtyRecord>,
    /// The record the in-flight run was launched from; folded back into
    /// `dirty` when that run is interrupted by a new request or by pause.
    in_flight: Option<DirtyRecord>,
}

impl TargetState {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            dirty: None,
            in_flight: None,
        }
    }

    fn is_quiescent(&self) -> bool {
        matches!(self.phase, Phase::Idle) && self.dirty.is_none() && self.in_flight.is_none()
    }

    /// Coalesce a new request: spans merge by union, the latest reason wins.
    fn record_request(&mut self, span: Span, reason: String) {
        match &mut self.dirty {
            Some(record) => {
                record.span = record.span.union(span);
                record.reason = reason;
            }
            None => self.dirty = Some(DirtyRecord { span, reason }),
        }
    }

    /// Fold the in-flight record back into `dirty` so an interrupted run's
    /// span is covered by the next one. A recorded reason stays; it is newer
    /// than the interrupted run's.
    fn fold_in_flight(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            match &mut self.dirty {
                Some(record) => record.span = record.span.union(in_flight.span),
                None => self.dirty = Some(in_flight),
            }
        }
    }
}

/// Pure per-target debounce state.
///
/// Owns the pause refcount and one [`Phase`] plus request records per
/// target. Quiescent targets are pruned after every step.
#[derive(Debug)]
pub struct DebounceCore {
    debounce: Duration,
    paused: u32,
    targets: HashMap<TargetId, TargetState>,
}

impl DebounceCore {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            paused: 0,
            targets: HashMap::new(),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused > 0
    }

    /// Earliest pending deadline, for the shell to arm its timer. `None`
    /// when nothing is pending (in particular, always `None` while paused).
    pub fn next_deadline(&self) -> Option<Instant> {
        self.targets
            .values()
            .filter_map(|state| match state.phase {
                Phase::Pending { deadline } => Some(deadline),
                _ => None,
            })
            .min()
    }

    /// Current phase of a target, for tests and diagnostics. Quiescent
    /// targets are pruned and report `None`.
    pub fn phase(&self, target: &TargetId) -> Option<Phase> {
        self.targets.get(target).map(|state| state.phase)
    }

    /// The coalesced request record for a target, if one exists.
    pub fn dirty_record(&self, target: &TargetId) -> Option<&DirtyRecord> {
        self.targets.get(target).and_then(|state| state.dirty.as_ref())
    }

    /// Handle a single event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, now: Instant, event: CoordEvent) -> CoordStep {
        let mut keep_running = true;
        let commands = match event {
            CoordEvent::Restart {
                target,
                span,
                reason,
            } => self.on_restart(now, target, span, reason),
            CoordEvent::RunNow { target } => self.on_run_now(target),
            CoordEvent::Pause => self.on_pause(),
            CoordEvent::Resume => self.on_resume(now),
            CoordEvent::RunLaunched { target, run } => self.on_run_launched(target, run),
            CoordEvent::LaunchFailed { target } => self.on_launch_failed(now, target),
            CoordEvent::RunEnded {
                target,
                run,
                canceled: _,
            } => self.on_run_ended(now, target, run),
            CoordEvent::TimerFired => self.on_timer(now),
            CoordEvent::Shutdown => {
                keep_running = false;
                Vec::new()
            }
        };
        self.targets.retain(|_, state| !state.is_quiescent());
        CoordStep {
            commands,
            keep_running,
        }
    }

    fn on_restart(
        &mut self,
        now: Instant,
        target: TargetId,
        span: Span,
        reason: String,
    ) -> Vec<CoordCommand> {
        let state = self
            .targets
            .entry(target.clone())
            .or_insert_with(TargetState::new);
        state.record_request(span, reason.clone());

        match state.phase {
            Phase::Running { run } => {
                state.fold_in_flight();
                state.phase = if self.paused > 0 {
                    Phase::Idle
                } else {
                    Phase::Pending {
                        deadline: now + self.debounce,
                    }
                };
                vec![CoordCommand::CancelRun {
                    target,
                    run,
                    reason,
                }]
            }
            Phase::Pending { .. } | Phase::Idle => {
                // Every request pushes the deadline out. While paused the
                // request stays recorded and resume reschedules it.
                if self.paused == 0 {
                    state.phase = Phase::Pending {
                        deadline: now + self.debounce,
                    };
                }
                Vec::new()
            }
            // Mid-launch: recorded; rescheduled once that run ends.
            Phase::Launching => Vec::new(),
        }
    }

    fn on_run_now(&mut self, target: TargetId) -> Vec<CoordCommand> {
        let state = self
            .targets
            .entry(target.clone())
            .or_insert_with(TargetState::new);

        if self.paused > 0 {
            // Record the wish; resume schedules it.
            if state.dirty.is_none() {
                state.dirty = Some(DirtyRecord {
                    span: Span::ALL,
                    reason: "run now".to_string(),
                });
            }
            return Vec::new();
        }

        let mut commands = Vec::new();
        match state.phase {
            Phase::Running { run } => {
                state.fold_in_flight();
                commands.push(CoordCommand::CancelRun {
                    target: target.clone(),
                    run,
                    reason: "run now".to_string(),
                });
            }
            // A launch is already on its way; that is as immediate as it
            // gets.
            Phase::Launching => return commands,
            Phase::Pending { .. } | Phase::Idle => {}
        }

        let record = state.dirty.take().unwrap_or_else(|| DirtyRecord {
            span: Span::ALL,
            reason: "run now".to_string(),
        });
        state.in_flight = Some(record.clone());
        state.phase = Phase::Launching;
        commands.push(CoordCommand::StartRun {
            target,
            span: record.span,
            reason: record.reason,
        });
        commands
    }

    fn on_pause(&mut self) -> Vec<CoordCommand> {
        self.paused += 1;
        if self.paused > 1 {
            return Vec::new();
        }

        let mut commands = Vec::new();
        for (target, state) in self.targets.iter_mut() {
            match state.phase {
                Phase::Running { run } => {
                    state.fold_in_flight();
                    state.phase = Phase::Idle;
                    commands.push(CoordCommand::CancelRun {
                        target: target.clone(),
                        run,
                        reason: "paused".to_string(),
                    });
                }
                Phase::Pending { .. } => state.phase = Phase::Idle,
                // A target mid-launch is caught when RunLaunched arrives.
                Phase::Launching | Phase::Idle => {}
            }
        }
        commands
    }

    fn on_resume(&mut self, now: Instant) -> Vec<CoordCommand> {
        debug_assert!(self.paused > 0, "resume without a matching pause");
        self.paused = self.paused.saturating_sub(1);
        if self.paused > 0 {
            return Vec::new();
        }

        for state in self.targets.values_mut() {
            if state.dirty.is_some() && matches!(state.phase, Phase::Idle) {
                state.phase = Phase::Pending {
                    deadline: now + self.debounce,
                };
            }
        }
        Vec::new()
    }

    fn on_run_launched(&mut self, target: TargetId, run: RunId) -> Vec<CoordCommand> {
        let Some(state) = self.targets.get_mut(&target) else {
            debug_assert!(false, "run launched for an unknown target");
            return Vec::new();
        };
        if !matches!(state.phase, Phase::Launching) {
            debug_assert!(false, "run launched for a target that was not launching");
            return Vec::new();
        }

        if self.paused > 0 {
            // Paused while the launch was in progress; take the run right
            // back down and keep its record for resume.
            state.fold_in_flight();
            state.phase = Phase::Idle;
            return vec![CoordCommand::CancelRun {
                target,
                run,
                reason: "paused".to_string(),
            }];
        }

        state.phase = Phase::Running { run };
        Vec::new()
    }

    fn on_launch_failed(&mut self, now: Instant, target: TargetId) -> Vec<CoordCommand> {
        if let Some(state) = self.targets.get_mut(&target) {
            // The record the launch was built from is dropped; requests that
            // arrived in the meantime get their own attempt.
            state.in_flight = None;
            if matches!(state.phase, Phase::Launching) {
                state.phase = match &state.dirty {
                    Some(_) if self.paused == 0 => Phase::Pending {
                        deadline: now + self.debounce,
                    },
                    _ => Phase::Idle,
                };
            }
        }
        Vec::new()
    }

    fn on_run_ended(&mut self, now: Instant, target: TargetId, run: RunId) -> Vec<CoordCommand> {
        let Some(state) = self.targets.get_mut(&target) else {
            return Vec::new();
        };
        match state.phase {
            Phase::Running { run: current } if current == run => {
                state.in_flight = None;
                state.phase = match &state.dirty {
                    Some(_) if self.paused == 0 => Phase::Pending {
                        deadline: now + self.debounce,
                    },
                    _ => Phase::Idle,
                };
            }
            // Stale notification for a superseded or already-handled run.
            _ => {}
        }
        Vec::new()
    }

    fn on_timer(&mut self, now: Instant) -> Vec<CoordCommand> {
        let mut commands = Vec::new();
        for (target, state) in self.targets.iter_mut() {
            let Phase::Pending { deadline } = state.phase else {
                continue;
            };
            if deadline > now {
                // Fired early; the shell re-arms from next_deadline().
                continue;
            }
            let Some(record) = state.dirty.take() else {
                debug_assert!(false, "pending target without a dirty record");
                state.phase = Phase::Idle;
                continue;
            };
            state.in_flight = Some(record.clone());
            state.phase = Phase::Launching;
            commands.push(CoordCommand::StartRun {
                target: target.clone(),
                span: record.span,
                reason: record.reason,
            });
        }
        commands
    }
}
