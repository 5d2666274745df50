//! Pure state-machine tests for the debounce core, driven with synthetic
//! instants so no real time passes.

use std::time::{Duration, Instant};

use passdag::restart::{CoordCommand, CoordEvent, DebounceCore, Phase};
use passdag::types::{RunId, Span, TargetId};
use passdag_test_utils::init_tracing;

const DEBOUNCE: Duration = Duration::from_millis(10);

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn target() -> TargetId {
    TargetId::from("doc")
}

fn restart(core: &mut DebounceCore, at: Instant, span: Span, reason: &str) -> Vec<CoordCommand> {
    core.step(
        at,
        CoordEvent::Restart {
            target: target(),
            span,
            reason: reason.to_string(),
        },
    )
    .commands
}

fn start_run(span: Span, reason: &str) -> CoordCommand {
    CoordCommand::StartRun {
        target: target(),
        span,
        reason: reason.to_string(),
    }
}

fn cancel_run(run: RunId, reason: &str) -> CoordCommand {
    CoordCommand::CancelRun {
        target: target(),
        run,
        reason: reason.to_string(),
    }
}

/// Drive a fresh core into `Running { run }` with `span` in flight.
fn running_core(t0: Instant, run: RunId, span: Span, reason: &str) -> DebounceCore {
    let mut core = DebounceCore::new(DEBOUNCE);
    assert!(restart(&mut core, t0, span, reason).is_empty());
    let commands = core.step(t0 + DEBOUNCE, CoordEvent::TimerFired).commands;
    assert_eq!(commands, vec![start_run(span, reason)]);
    let commands = core
        .step(
            t0 + DEBOUNCE + ms(1),
            CoordEvent::RunLaunched {
                target: target(),
                run,
            },
        )
        .commands;
    assert!(commands.is_empty());
    assert_eq!(core.phase(&target()), Some(Phase::Running { run }));
    core
}

#[test]
fn burst_collapses_into_one_run() {
    init_tracing();
    let mut core = DebounceCore::new(DEBOUNCE);
    let t0 = Instant::now();

    assert!(restart(&mut core, t0, Span::new(0, 10), "edit a").is_empty());
    assert_eq!(core.next_deadline(), Some(t0 + ms(10)));

    // Every request pushes the window out and merges its span.
    assert!(restart(&mut core, t0 + ms(5), Span::new(10, 20), "edit b").is_empty());
    assert!(restart(&mut core, t0 + ms(8), Span::new(5, 30), "edit c").is_empty());
    assert_eq!(core.next_deadline(), Some(t0 + ms(18)));

    // The original deadline elapsing is a no-op; the window moved.
    let step = core.step(t0 + ms(10), CoordEvent::TimerFired);
    assert!(step.commands.is_empty());
    assert!(step.keep_running);

    let commands = core.step(t0 + ms(18), CoordEvent::TimerFired).commands;
    assert_eq!(commands, vec![start_run(Span::new(0, 30), "edit c")]);
    assert_eq!(core.phase(&target()), Some(Phase::Launching));
    assert_eq!(core.next_deadline(), None);
}

#[test]
fn restart_while_running_cancels_and_reschedules() {
    init_tracing();
    let t0 = Instant::now();
    let mut core = running_core(t0, RunId(1), Span::new(0, 10), "edit");

    let commands = restart(&mut core, t0 + ms(20), Span::new(40, 50), "edit again");
    assert_eq!(commands, vec![cancel_run(RunId(1), "edit again")]);
    assert_eq!(core.next_deadline(), Some(t0 + ms(30)));

    // The interrupted run's span folds into the backlog; the new reason wins.
    let record = core.dirty_record(&target()).unwrap();
    assert_eq!(record.span, Span::new(0, 50));
    assert_eq!(record.reason, "edit again");

    // The canceled run's end notification is stale and changes nothing.
    let step = core.step(
        t0 + ms(21),
        CoordEvent::RunEnded {
            target: target(),
            run: RunId(1),
            canceled: true,
        },
    );
    assert!(step.commands.is_empty());
    assert_eq!(core.next_deadline(), Some(t0 + ms(30)));

    let commands = core.step(t0 + ms(30), CoordEvent::TimerFired).commands;
    assert_eq!(commands, vec![start_run(Span::new(0, 50), "edit again")]);
}

#[test]
fn requests_during_launch_wait_for_that_run() {
    init_tracing();
    let mut core = DebounceCore::new(DEBOUNCE);
    let t0 = Instant::now();

    restart(&mut core, t0, Span::new(0, 10), "first");
    core.step(t0 + ms(10), CoordEvent::TimerFired);
    assert_eq!(core.phase(&target()), Some(Phase::Launching));

    // Mid-launch requests are recorded without commands.
    assert!(restart(&mut core, t0 + ms(11), Span::new(20, 30), "second").is_empty());
    assert_eq!(core.phase(&target()), Some(Phase::Launching));

    core.step(
        t0 + ms(12),
        CoordEvent::RunLaunched {
            target: target(),
            run: RunId(7),
        },
    );
    assert_eq!(core.phase(&target()), Some(Phase::Running { run: RunId(7) }));

    // When that run finishes, the recorded request gets its own window.
    core.step(
        t0 + ms(20),
        CoordEvent::RunEnded {
            target: target(),
            run: RunId(7),
            canceled: false,
        },
    );
    assert_eq!(core.next_deadline(), Some(t0 + ms(30)));

    let commands = core.step(t0 + ms(30), CoordEvent::TimerFired).commands;
    assert_eq!(commands, vec![start_run(Span::new(20, 30), "second")]);
}

#[test]
fn finished_run_with_no_backlog_goes_quiescent() {
    init_tracing();
    let t0 = Instant::now();
    let mut core = running_core(t0, RunId(1), Span::new(0, 10), "edit");

    core.step(
        t0 + ms(20),
        CoordEvent::RunEnded {
            target: target(),
            run: RunId(1),
            canceled: false,
        },
    );
    assert_eq!(core.phase(&target()), None);
    assert_eq!(core.next_deadline(), None);
    assert!(core.dirty_record(&target()).is_none());
}

#[test]
fn canceled_run_without_new_requests_is_not_retried() {
    init_tracing();
    let t0 = Instant::now();
    let mut core = running_core(t0, RunId(1), Span::new(0, 10), "edit");

    // Canceled from outside the coordinator (e.g. a failed pass); nothing
    // was recorded since, so nothing reschedules.
    core.step(
        t0 + ms(20),
        CoordEvent::RunEnded {
            target: target(),
            run: RunId(1),
            canceled: true,
        },
    );
    assert_eq!(core.phase(&target()), None);
    assert_eq!(core.next_deadline(), None);
}

#[test]
fn pause_cancels_live_runs_and_resume_reschedules() {
    init_tracing();
    let t0 = Instant::now();
    let mut core = running_core(t0, RunId(3), Span::new(0, 10), "edit");

    let commands = core.step(t0 + ms(20), CoordEvent::Pause).commands;
    assert_eq!(commands, vec![cancel_run(RunId(3), "paused")]);
    assert!(core.is_paused());
    assert_eq!(core.phase(&target()), Some(Phase::Idle));
    assert_eq!(core.next_deadline(), None);

    // Requests while paused are recorded without arming a timer.
    assert!(restart(&mut core, t0 + ms(25), Span::new(40, 50), "while paused").is_empty());
    assert_eq!(core.next_deadline(), None);

    // The canceled run's end arrives late; still nothing to do.
    core.step(
        t0 + ms(26),
        CoordEvent::RunEnded {
            target: target(),
            run: RunId(3),
            canceled: true,
        },
    );
    assert_eq!(core.next_deadline(), None);

    core.step(t0 + ms(30), CoordEvent::Resume);
    assert!(!core.is_paused());
    assert_eq!(core.next_deadline(), Some(t0 + ms(40)));

    // The interrupted run's span was folded in at pause time.
    let commands = core.step(t0 + ms(40), CoordEvent::TimerFired).commands;
    assert_eq!(commands, vec![start_run(Span::new(0, 50), "while paused")]);
}

#[test]
fn pause_refcount_requires_matching_resumes() {
    init_tracing();
    let mut core = DebounceCore::new(DEBOUNCE);
    let t0 = Instant::now();

    assert!(core.step(t0, CoordEvent::Pause).commands.is_empty());
    assert!(core.step(t0, CoordEvent::Pause).commands.is_empty());

    restart(&mut core, t0 + ms(1), Span::new(0, 10), "queued");
    assert_eq!(core.phase(&target()), Some(Phase::Idle));

    core.step(t0 + ms(2), CoordEvent::Resume);
    assert!(core.is_paused());
    assert_eq!(core.next_deadline(), None);

    core.step(t0 + ms(3), CoordEvent::Resume);
    assert!(!core.is_paused());
    assert_eq!(core.next_deadline(), Some(t0 + ms(13)));
}

#[test]
fn run_now_skips_the_debounce_window() {
    init_tracing();
    let mut core = DebounceCore::new(DEBOUNCE);
    let t0 = Instant::now();

    restart(&mut core, t0, Span::new(0, 10), "edit");
    let commands = core
        .step(t0 + ms(1), CoordEvent::RunNow { target: target() })
        .commands;
    assert_eq!(commands, vec![start_run(Span::new(0, 10), "edit")]);
    assert_eq!(core.phase(&target()), Some(Phase::Launching));
    assert_eq!(core.next_deadline(), None);
}

#[test]
fn run_now_without_backlog_covers_everything() {
    init_tracing();
    let mut core = DebounceCore::new(DEBOUNCE);
    let t0 = Instant::now();

    let commands = core
        .step(t0, CoordEvent::RunNow { target: target() })
        .commands;
    assert_eq!(commands, vec![start_run(Span::ALL, "run now")]);
}

#[test]
fn run_now_while_running_cancels_the_current_run_first() {
    init_tracing();
    let t0 = Instant::now();
    let mut core = running_core(t0, RunId(5), Span::new(0, 10), "edit");

    let commands = core
        .step(t0 + ms(20), CoordEvent::RunNow { target: target() })
        .commands;
    // The interrupted run folds back in, so the immediate run re-covers its
    // span under the original reason.
    assert_eq!(
        commands,
        vec![
            cancel_run(RunId(5), "run now"),
            start_run(Span::new(0, 10), "edit"),
        ]
    );
    assert_eq!(core.phase(&target()), Some(Phase::Launching));
}

#[test]
fn run_now_while_launching_is_a_no_op() {
    init_tracing();
    let mut core = DebounceCore::new(DEBOUNCE);
    let t0 = Instant::now();

    restart(&mut core, t0, Span::new(0, 10), "edit");
    core.step(t0 + ms(10), CoordEvent::TimerFired);
    assert_eq!(core.phase(&target()), Some(Phase::Launching));

    let commands = core
        .step(t0 + ms(11), CoordEvent::RunNow { target: target() })
        .commands;
    assert!(commands.is_empty());
}

#[test]
fn run_now_while_paused_only_records() {
    init_tracing();
    let mut core = DebounceCore::new(DEBOUNCE);
    let t0 = Instant::now();

    core.step(t0, CoordEvent::Pause);
    let commands = core
        .step(t0 + ms(1), CoordEvent::RunNow { target: target() })
        .commands;
    assert!(commands.is_empty());
    assert_eq!(core.dirty_record(&target()).unwrap().span, Span::ALL);

    core.step(t0 + ms(2), CoordEvent::Resume);
    assert_eq!(core.next_deadline(), Some(t0 + ms(12)));
}

#[test]
fn paused_while_launching_takes_the_run_back_down() {
    init_tracing();
    let mut core = DebounceCore::new(DEBOUNCE);
    let t0 = Instant::now();

    restart(&mut core, t0, Span::new(0, 10), "edit");
    core.step(t0 + ms(10), CoordEvent::TimerFired);

    // Pause lands in the window between StartRun and RunLaunched.
    assert!(core.step(t0 + ms(11), CoordEvent::Pause).commands.is_empty());
    let commands = core
        .step(
            t0 + ms(12),
            CoordEvent::RunLaunched {
                target: target(),
                run: RunId(4),
            },
        )
        .commands;
    assert_eq!(commands, vec![cancel_run(RunId(4), "paused")]);
    assert_eq!(core.phase(&target()), Some(Phase::Idle));

    // Its record survived for the resume.
    core.step(t0 + ms(13), CoordEvent::Resume);
    assert_eq!(core.next_deadline(), Some(t0 + ms(23)));
}

#[test]
fn launch_failure_drops_the_attempt_but_keeps_newer_requests() {
    init_tracing();
    let mut core = DebounceCore::new(DEBOUNCE);
    let t0 = Instant::now();

    // No backlog: a failed launch leaves the target quiescent.
    restart(&mut core, t0, Span::new(0, 10), "edit");
    core.step(t0 + ms(10), CoordEvent::TimerFired);
    core.step(t0 + ms(11), CoordEvent::LaunchFailed { target: target() });
    assert_eq!(core.phase(&target()), None);
    assert_eq!(core.next_deadline(), None);

    // With a request that raced the launch: only that request is retried,
    // not the failed record.
    restart(&mut core, t0 + ms(20), Span::new(0, 10), "edit b");
    core.step(t0 + ms(30), CoordEvent::TimerFired);
    restart(&mut core, t0 + ms(31), Span::new(50, 60), "late edit");
    core.step(t0 + ms(32), CoordEvent::LaunchFailed { target: target() });
    assert_eq!(core.next_deadline(), Some(t0 + ms(42)));

    let commands = core.step(t0 + ms(42), CoordEvent::TimerFired).commands;
    assert_eq!(commands, vec![start_run(Span::new(50, 60), "late edit")]);
}

#[test]
fn stale_run_ended_is_ignored() {
    init_tracing();
    let t0 = Instant::now();
    let mut core = running_core(t0, RunId(2), Span::new(0, 10), "edit");

    core.step(
        t0 + ms(20),
        CoordEvent::RunEnded {
            target: target(),
            run: RunId(9),
            canceled: false,
        },
    );
    assert_eq!(core.phase(&target()), Some(Phase::Running { run: RunId(2) }));
}

#[test]
fn independent_targets_keep_independent_deadlines() {
    init_tracing();
    let mut core = DebounceCore::new(DEBOUNCE);
    let t0 = Instant::now();
    let a = TargetId::from("a");
    let b = TargetId::from("b");

    core.step(
        t0,
        CoordEvent::Restart {
            target: a.clone(),
            span: Span::new(0, 10),
            reason: "edit a".to_string(),
        },
    );
    core.step(
        t0 + ms(4),
        CoordEvent::Restart {
            target: b.clone(),
            span: Span::new(0, 10),
            reason: "edit b".to_string(),
        },
    );
    assert_eq!(core.next_deadline(), Some(t0 + ms(10)));

    let commands = core.step(t0 + ms(10), CoordEvent::TimerFired).commands;
    assert_eq!(
        commands,
        vec![CoordCommand::StartRun {
            target: a,
            span: Span::new(0, 10),
            reason: "edit a".to_string(),
        }]
    );
    assert_eq!(core.next_deadline(), Some(t0 + ms(14)));

    let commands = core.step(t0 + ms(14), CoordEvent::TimerFired).commands;
    assert_eq!(
        commands,
        vec![CoordCommand::StartRun {
            target: b,
            span: Span::new(0, 10),
            reason: "edit b".to_string(),
        }]
    );
}

#[test]
fn zero_debounce_fires_on_the_next_timer() {
    init_tracing();
    let mut core = DebounceCore::new(Duration::ZERO);
    let t0 = Instant::now();

    restart(&mut core, t0, Span::new(0, 10), "edit");
    assert_eq!(core.next_deadline(), Some(t0));

    let commands = core.step(t0, CoordEvent::TimerFired).commands;
    assert_eq!(commands, vec![start_run(Span::new(0, 10), "edit")]);
}

#[test]
fn shutdown_stops_the_loop_without_commands() {
    init_tracing();
    let mut core = DebounceCore::new(DEBOUNCE);
    let t0 = Instant::now();

    restart(&mut core, t0, Span::new(0, 10), "edit");
    let step = core.step(t0 + ms(1), CoordEvent::Shutdown);
    assert!(!step.keep_running);
    assert!(step.commands.is_empty());
}
