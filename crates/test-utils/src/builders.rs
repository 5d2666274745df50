#![allow(dead_code)]

//! Probe passes for scheduler tests.
//!
//! A [`ProbePass`] records when each of its phases starts and ends into a
//! shared [`EventLog`], so tests can assert ordering between phases of
//! different passes. Builders configure predecessor declarations and inject
//! behaviour (block, fail, panic) into either phase.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use passdag::cancel::CancelToken;
use passdag::pass::{Pass, PassError, PassId, PassPayload};

/// Which phase of a pass produced a probe event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePhase {
    CollectStart,
    CollectEnd,
    ApplyStart,
    ApplyEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeEvent {
    pub pass: PassId,
    pub phase: ProbePhase,
}

/// Shared, thread-safe log of probe events.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<ProbeEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, pass: PassId, phase: ProbePhase) {
        self.events.lock().unwrap().push(ProbeEvent { pass, phase });
    }

    pub fn events(&self) -> Vec<ProbeEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Index of the first occurrence of `(pass, phase)`, if recorded.
    pub fn position(&self, pass: PassId, phase: ProbePhase) -> Option<usize> {
        self.events()
            .iter()
            .position(|e| e.pass == pass && e.phase == phase)
    }

    pub fn count(&self, pass: PassId, phase: ProbePhase) -> usize {
        self.events()
            .iter()
            .filter(|e| e.pass == pass && e.phase == phase)
            .count()
    }
}

type CollectHook = dyn Fn(&CancelToken) -> Result<(), PassError> + Send + Sync;
type ApplyHook = dyn Fn() -> anyhow::Result<()> + Send + Sync;

/// A pass that records its phase transitions into an [`EventLog`].
///
/// `collect` records `CollectStart`, runs the configured hook (if any), and
/// records `CollectEnd` only on success. `apply` checks that the payload is
/// the one this pass collected, then records `ApplyStart` / `ApplyEnd`
/// around its hook.
pub struct ProbePass {
    id: PassId,
    completion_preds: Vec<PassId>,
    starting_preds: Vec<PassId>,
    log: EventLog,
    collect_hook: Option<Box<CollectHook>>,
    apply_hook: Option<Box<ApplyHook>>,
}

impl Pass for ProbePass {
    fn id(&self) -> PassId {
        self.id
    }

    fn completion_predecessors(&self) -> &[PassId] {
        &self.completion_preds
    }

    fn starting_predecessors(&self) -> &[PassId] {
        &self.starting_preds
    }

    fn collect(&self, token: &CancelToken) -> Result<PassPayload, PassError> {
        self.log.record(self.id, ProbePhase::CollectStart);
        token.check()?;
        if let Some(hook) = &self.collect_hook {
            hook(token)?;
        }
        self.log.record(self.id, ProbePhase::CollectEnd);
        Ok(Box::new(self.id))
    }

    fn apply(&self, payload: PassPayload) -> anyhow::Result<()> {
        self.log.record(self.id, ProbePhase::ApplyStart);
        let id = payload.downcast_ref::<PassId>().copied();
        assert_eq!(id, Some(self.id), "apply received a foreign payload");
        if let Some(hook) = &self.apply_hook {
            hook()?;
        }
        self.log.record(self.id, ProbePhase::ApplyEnd);
        Ok(())
    }
}

/// Builder for [`ProbePass`].
pub struct ProbePassBuilder {
    id: PassId,
    completion_preds: Vec<PassId>,
    starting_preds: Vec<PassId>,
    log: EventLog,
    collect_hook: Option<Box<CollectHook>>,
    apply_hook: Option<Box<ApplyHook>>,
}

impl ProbePassBuilder {
    pub fn new(id: u32, log: &EventLog) -> Self {
        Self {
            id: PassId(id),
            completion_preds: Vec::new(),
            starting_preds: Vec::new(),
            log: log.clone(),
            collect_hook: None,
            apply_hook: None,
        }
    }

    /// Declare a completion-predecessor: `pred`'s apply must complete before
    /// this pass's collect starts.
    pub fn after_apply(mut self, pred: u32) -> Self {
        self.completion_preds.push(PassId(pred));
        self
    }

    /// Declare a starting-predecessor: this pass may only be submitted once
    /// `pred`'s collect has begun.
    pub fn after_start(mut self, pred: u32) -> Self {
        self.starting_preds.push(PassId(pred));
        self
    }

    /// Run `hook` inside `collect`, between the start and end probe events.
    pub fn with_collect<F>(mut self, hook: F) -> Self
    where
        F: Fn(&CancelToken) -> Result<(), PassError> + Send + Sync + 'static,
    {
        self.collect_hook = Some(Box::new(hook));
        self
    }

    /// Run `hook` inside `apply`, between the start and end probe events.
    pub fn with_apply<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.apply_hook = Some(Box::new(hook));
        self
    }

    /// Make `collect` fail with the given message.
    pub fn fail_collect(self, msg: &str) -> Self {
        let msg = msg.to_string();
        self.with_collect(move |_| Err(PassError::Failed(anyhow!("{msg}"))))
    }

    /// Make `collect` panic with the given message.
    pub fn panic_collect(self, msg: &str) -> Self {
        let msg = msg.to_string();
        self.with_collect(move |_| panic!("{msg}"))
    }

    /// Make `apply` fail with the given message.
    pub fn fail_apply(self, msg: &str) -> Self {
        let msg = msg.to_string();
        self.with_apply(move || Err(anyhow!("{msg}")))
    }

    /// Make `collect` sleep before succeeding.
    pub fn sleep_collect(self, duration: Duration) -> Self {
        self.with_collect(move |_| {
            std::thread::sleep(duration);
            Ok(())
        })
    }

    pub fn build(self) -> Arc<dyn Pass> {
        Arc::new(ProbePass {
            id: self.id,
            completion_preds: self.completion_preds,
            starting_preds: self.starting_preds,
            log: self.log,
            collect_hook: self.collect_hook,
            apply_hook: self.apply_hook,
        })
    }
}
