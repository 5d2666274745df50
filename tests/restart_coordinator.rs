//! End-to-end tests for the coordinator shell: real timers, a real
//! scheduler, and a static pass source.

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use passdag::config::{DaemonConfig, RestartConfig, SchedulerConfig};
use passdag::pass::{Pass, PassError, PassId};
use passdag::types::{Span, TargetId};
use passdag_test_utils::builders::{EventLog, ProbePassBuilder, ProbePhase};
use passdag_test_utils::fakes::{RecordingListener, RunEventKind, StaticSource};
use passdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn config(debounce_ms: u64) -> DaemonConfig {
    DaemonConfig {
        scheduler: SchedulerConfig::default(),
        restart: RestartConfig { debounce_ms },
    }
}

async fn wait_until_set(flag: &AtomicBool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !flag.load(Ordering::SeqCst) {
        assert!(Instant::now() < deadline, "flag never became true");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test]
async fn burst_of_requests_produces_a_single_merged_run() -> TestResult {
    init_tracing();
    let log = EventLog::new();
    let source = StaticSource::new(vec![ProbePassBuilder::new(1, &log).build()]);
    let daemon = passdag::start(&config(200), source.clone(), None)?;
    let listener = RecordingListener::new();
    daemon.add_listener(listener.clone());

    let target = TargetId::from("doc");
    let burst_started = Instant::now();
    daemon.request_restart(target.clone(), Span::new(0, 10), "edit 1");
    tokio::time::sleep(Duration::from_millis(20)).await;
    daemon.request_restart(target.clone(), Span::new(5, 20), "edit 2");

    with_timeout(listener.wait_for(RunEventKind::Finished, 1)).await;

    // The second request pushed the window out, so nothing could finish
    // before its own full debounce elapsed.
    let elapsed = burst_started.elapsed();
    assert!(
        elapsed >= Duration::from_millis(220),
        "run finished before the pushed-out deadline: {elapsed:?}"
    );

    assert_eq!(listener.count(RunEventKind::Started), 1);
    assert_eq!(source.calls(), 1);
    assert_eq!(log.count(PassId(1), ProbePhase::ApplyEnd), 1);

    // The run covered the union of both requests.
    let run = daemon.current_run(&target).unwrap();
    assert_eq!(run.span(), Span::new(0, 20));
    assert!(run.token().is_stopped());

    daemon.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn run_now_flushes_without_waiting_for_the_window() -> TestResult {
    init_tracing();
    let log = EventLog::new();
    let source = StaticSource::new(vec![ProbePassBuilder::new(1, &log).build()]);
    // A debounce long enough that only run_now can explain a finished run.
    let daemon = passdag::start(&config(60_000), source, None)?;
    let listener = RecordingListener::new();
    daemon.add_listener(listener.clone());

    let target = TargetId::from("doc");
    daemon.request_restart(target.clone(), Span::new(0, 10), "edit");
    daemon.run_now(target.clone());

    with_timeout(listener.wait_for(RunEventKind::Finished, 1)).await;
    assert_eq!(listener.count(RunEventKind::Started), 1);

    // The recorded request was used rather than a whole-target span.
    let run = daemon.current_run(&target).unwrap();
    assert_eq!(run.span(), Span::new(0, 10));

    daemon.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn direct_launch_through_the_scheduler_handle_bypasses_the_coordinator() -> TestResult {
    init_tracing();
    let log = EventLog::new();
    let source = StaticSource::new(vec![ProbePassBuilder::new(1, &log).build()]);
    // A debounce long enough that the coordinator cannot be the launcher.
    let daemon = passdag::start(&config(60_000), source.clone(), None)?;
    let listener = RecordingListener::new();
    daemon.add_listener(listener.clone());

    let target = TargetId::from("doc");
    let manual = daemon.scheduler().launch(
        target.clone(),
        Span::new(0, 10),
        vec![ProbePassBuilder::new(2, &log).build()],
    )?;
    with_timeout(listener.wait_for(RunEventKind::Finished, 1)).await;

    // The pass set was handed over directly; the source was never consulted.
    assert_eq!(source.calls(), 0);
    assert_eq!(log.count(PassId(2), ProbePhase::ApplyEnd), 1);
    assert!(manual.token().is_stopped());

    // Coordinated runs keep working on the same target afterwards.
    daemon.run_now(target.clone());
    with_timeout(listener.wait_for(RunEventKind::Finished, 2)).await;
    assert_eq!(source.calls(), 1);
    assert_eq!(log.count(PassId(1), ProbePhase::ApplyEnd), 1);

    daemon.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn paused_coordinator_holds_requests_until_resume() -> TestResult {
    init_tracing();
    let log = EventLog::new();
    let source = StaticSource::new(vec![ProbePassBuilder::new(1, &log).build()]);
    let daemon = passdag::start(&config(20), source, None)?;
    let listener = RecordingListener::new();
    daemon.add_listener(listener.clone());

    let target = TargetId::from("doc");
    daemon.pause();
    daemon.request_restart(target.clone(), Span::new(0, 10), "edit while paused");

    // Well past the debounce window; the request must still be parked.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(listener.count(RunEventKind::Started), 0);

    let resumed_at = Instant::now();
    daemon.resume();
    with_timeout(listener.wait_for(RunEventKind::Finished, 1)).await;

    assert!(resumed_at.elapsed() >= Duration::from_millis(20));
    assert_eq!(listener.count(RunEventKind::Started), 1);

    daemon.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn restart_during_a_run_supersedes_it_and_merges_spans() -> TestResult {
    init_tracing();
    let log = EventLog::new();
    let entered = Arc::new(AtomicBool::new(false));
    let released = Arc::new(AtomicBool::new(false));

    let pass: Arc<dyn Pass> = {
        let entered = Arc::clone(&entered);
        let released = Arc::clone(&released);
        ProbePassBuilder::new(1, &log)
            .with_collect(move |token| {
                entered.store(true, Ordering::SeqCst);
                let deadline = Instant::now() + Duration::from_secs(5);
                while !released.load(Ordering::SeqCst) && token.check().is_ok() {
                    if Instant::now() > deadline {
                        return Err(PassError::Failed(anyhow::anyhow!("never released")));
                    }
                    std::thread::sleep(Duration::from_millis(2));
                }
                if token.check().is_err() {
                    return Err(PassError::Canceled);
                }
                Ok(())
            })
            .build()
    };
    let source = StaticSource::new(vec![pass]);
    let daemon = passdag::start(&config(20), source, None)?;
    let listener = RecordingListener::new();
    daemon.add_listener(listener.clone());

    let target = TargetId::from("doc");
    daemon.request_restart(target.clone(), Span::new(0, 10), "first edit");
    with_timeout(listener.wait_for(RunEventKind::Started, 1)).await;
    wait_until_set(&entered).await;

    // A request landing mid-run cancels it with the request's reason.
    daemon.request_restart(target.clone(), Span::new(20, 30), "second edit");
    with_timeout(listener.wait_for(RunEventKind::Canceled, 1)).await;

    let events = listener.events();
    let canceled = events
        .iter()
        .find(|e| e.kind == RunEventKind::Canceled)
        .unwrap();
    assert_eq!(canceled.reason.as_deref(), Some("second edit"));

    // Let the replacement run complete.
    released.store(true, Ordering::SeqCst);
    with_timeout(listener.wait_for(RunEventKind::Finished, 1)).await;

    assert_eq!(listener.count(RunEventKind::Started), 2);
    let run = daemon.current_run(&target).unwrap();
    // The interrupted run's span folded into the replacement.
    assert_eq!(run.span(), Span::new(0, 30));

    daemon.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn shutdown_cancels_live_runs_and_ignores_later_requests() -> TestResult {
    init_tracing();
    let log = EventLog::new();
    let entered = Arc::new(AtomicBool::new(false));

    let pass: Arc<dyn Pass> = {
        let entered = Arc::clone(&entered);
        ProbePassBuilder::new(1, &log)
            .with_collect(move |token| {
                entered.store(true, Ordering::SeqCst);
                let deadline = Instant::now() + Duration::from_secs(5);
                while token.check().is_ok() {
                    if Instant::now() > deadline {
                        return Err(PassError::Failed(anyhow::anyhow!("never canceled")));
                    }
                    std::thread::sleep(Duration::from_millis(2));
                }
                Err(PassError::Canceled)
            })
            .build()
    };
    let source = StaticSource::new(vec![pass]);
    let daemon = passdag::start(&config(20), source, None)?;
    let listener = RecordingListener::new();
    daemon.add_listener(listener.clone());

    let target = TargetId::from("doc");
    daemon.run_now(target.clone());
    with_timeout(listener.wait_for(RunEventKind::Started, 1)).await;
    wait_until_set(&entered).await;

    daemon.shutdown().await;

    // The live run went down with the coordinator.
    assert_eq!(listener.count(RunEventKind::Canceled), 1);
    let events = listener.events();
    let canceled = events
        .iter()
        .find(|e| e.kind == RunEventKind::Canceled)
        .unwrap();
    assert_eq!(canceled.reason.as_deref(), Some("coordinator shutdown"));
    assert!(daemon.current_run(&target).unwrap().token().is_canceled());

    // Requests after shutdown go nowhere.
    daemon.request_restart(target.clone(), Span::ALL, "too late");
    daemon.run_now(target.clone());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(listener.count(RunEventKind::Started), 1);
    Ok(())
}
