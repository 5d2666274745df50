#![allow(dead_code)]

//! Fake collaborators for integration tests: a recording run listener, an
//! in-memory dirty-region tracker, and a fixed pass source.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use passdag::dirty::DirtyRegionTracker;
use passdag::pass::{Pass, PassId, PassSource};
use passdag::sched::RunListener;
use passdag::types::{RunId, Span, TargetId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEventKind {
    Started,
    Canceled,
    Finished,
}

/// One run lifecycle event as seen by a [`RecordingListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunEvent {
    pub kind: RunEventKind,
    pub target: TargetId,
    pub run: RunId,
    /// Cancellation reason, for `Canceled` events.
    pub reason: Option<String>,
}

/// Listener that records every run lifecycle event and wakes waiters.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<RunEvent>>,
    changed: Notify,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, kind: RunEventKind) -> usize {
        self.events().iter().filter(|e| e.kind == kind).count()
    }

    fn push(&self, event: RunEvent) {
        self.events.lock().unwrap().push(event);
        self.changed.notify_waiters();
    }

    /// Wait until at least `n` events of `kind` have been recorded.
    ///
    /// Combine with `with_timeout` in tests so a missing event fails instead
    /// of hanging.
    pub async fn wait_for(&self, kind: RunEventKind, n: usize) {
        loop {
            // Register interest before checking, so a notification between
            // the check and the await is not lost.
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count(kind) >= n {
                return;
            }
            notified.await;
        }
    }
}

impl RunListener for RecordingListener {
    fn run_started(&self, target: &TargetId, run: RunId) {
        self.push(RunEvent {
            kind: RunEventKind::Started,
            target: target.clone(),
            run,
            reason: None,
        });
    }

    fn run_canceled(&self, target: &TargetId, run: RunId, reason: &str) {
        self.push(RunEvent {
            kind: RunEventKind::Canceled,
            target: target.clone(),
            run,
            reason: Some(reason.to_string()),
        });
    }

    fn run_finished(&self, target: &TargetId, run: RunId) {
        self.push(RunEvent {
            kind: RunEventKind::Finished,
            target: target.clone(),
            run,
            reason: None,
        });
    }
}

/// In-memory tracker: a pass is up to date for a span when its last recorded
/// mark covers that span.
#[derive(Default)]
pub struct MemoryDirtyTracker {
    clean: Mutex<HashMap<PassId, Span>>,
}

impl MemoryDirtyTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The last span `pass` was marked up to date for.
    pub fn marked(&self, pass: PassId) -> Option<Span> {
        self.clean.lock().unwrap().get(&pass).copied()
    }

    /// Forget a pass's mark, making it dirty again.
    pub fn invalidate(&self, pass: PassId) {
        self.clean.lock().unwrap().remove(&pass);
    }
}

impl DirtyRegionTracker for MemoryDirtyTracker {
    fn is_up_to_date(&self, pass: PassId, span: Span) -> bool {
        self.clean
            .lock()
            .unwrap()
            .get(&pass)
            .is_some_and(|clean| clean.contains(span))
    }

    fn mark_up_to_date(&self, pass: PassId, span: Span) {
        self.clean.lock().unwrap().insert(pass, span);
    }
}

/// Pass source that hands out a fixed set for every target.
pub struct StaticSource {
    passes: Mutex<Vec<Arc<dyn Pass>>>,
    calls: AtomicUsize,
}

impl StaticSource {
    pub fn new(passes: Vec<Arc<dyn Pass>>) -> Arc<Self> {
        Arc::new(Self {
            passes: Mutex::new(passes),
            calls: AtomicUsize::new(0),
        })
    }

    /// Number of times `passes_for` has been called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Replace the pass set handed to the next run.
    pub fn set_passes(&self, passes: Vec<Arc<dyn Pass>>) {
        *self.passes.lock().unwrap() = passes;
    }
}

impl PassSource for StaticSource {
    fn passes_for(&self, _target: &TargetId) -> Vec<Arc<dyn Pass>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.passes.lock().unwrap().clone()
    }
}
