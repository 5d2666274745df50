use anyhow::anyhow;
use passdag::cancel::{CancelState, CancelToken};
use passdag_test_utils::init_tracing;

#[test]
fn normal_lifecycle_ends_stopped() {
    init_tracing();
    let token = CancelToken::new();
    assert_eq!(token.state(), CancelState::Created);
    assert!(!token.is_running());

    assert!(token.start());
    assert_eq!(token.state(), CancelState::Running);
    assert!(token.check().is_ok());

    assert!(token.stop());
    assert_eq!(token.state(), CancelState::Stopped);
    assert!(token.is_stopped());
    assert!(!token.is_canceled());

    // Terminal states never reactivate.
    assert!(!token.cancel("late"));
    assert_eq!(token.state(), CancelState::Stopped);
    assert!(token.cancel_cause().is_none());
}

#[test]
fn cancel_is_idempotent_and_keeps_the_first_reason() {
    init_tracing();
    let token = CancelToken::new();
    assert!(token.start());

    assert!(token.cancel("first"));
    assert!(!token.cancel("second"));

    assert!(token.is_canceled());
    let cause = token.cancel_cause().unwrap();
    assert_eq!(cause.reason(), "first");
    assert!(cause.source().is_none());
}

#[test]
fn cancel_with_cause_retains_the_originating_error() {
    init_tracing();
    let token = CancelToken::new();
    assert!(token.start());

    assert!(token.cancel_with_cause(anyhow!("boom"), "pass 3 failed during collect"));

    let cause = token.cancel_cause().unwrap();
    assert_eq!(cause.reason(), "pass 3 failed during collect");
    assert_eq!(cause.source().unwrap().to_string(), "boom");
    assert!(token.check().is_err());
}

#[test]
fn cancel_before_start_wins_the_race() {
    init_tracing();
    let token = CancelToken::new();

    // A restart request can land between run creation and start().
    assert!(token.cancel("superseded before start"));
    assert_eq!(token.state(), CancelState::Canceled);

    assert!(!token.start());
    assert_eq!(token.state(), CancelState::Canceled);
    assert_eq!(
        token.cancel_cause().unwrap().reason(),
        "superseded before start"
    );
}

#[test]
fn stop_only_succeeds_from_running() {
    init_tracing();
    let created = CancelToken::new();
    assert!(!created.stop());
    assert_eq!(created.state(), CancelState::Created);

    let canceled = CancelToken::new();
    assert!(canceled.start());
    assert!(canceled.cancel("user canceled"));
    assert!(!canceled.stop());
    assert_eq!(canceled.state(), CancelState::Canceled);
}

#[test]
fn clones_share_the_same_state() {
    init_tracing();
    let token = CancelToken::new();
    let observer = token.clone();
    assert!(token.start());

    assert!(observer.is_running());
    assert!(observer.cancel("seen by all clones"));
    assert!(token.is_canceled());
    assert_eq!(
        token.cancel_cause().unwrap().reason(),
        "seen by all clones"
    );
}

#[test]
fn concurrent_cancels_produce_exactly_one_winner() {
    init_tracing();
    let token = CancelToken::new();
    assert!(token.start());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let token = token.clone();
            std::thread::spawn(move || token.cancel(format!("racer {i}")))
        })
        .collect();

    let wins = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();

    assert_eq!(wins, 1);
    assert!(token.is_canceled());
    // The stored reason belongs to whichever racer won.
    let reason = token.cancel_cause().unwrap().reason().to_string();
    assert!(reason.starts_with("racer "));
}
