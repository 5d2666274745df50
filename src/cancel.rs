// src/cancel.rs

//! Per-run cancellation token.
//!
//! Every run owns exactly one [`CancelToken`]; every component of that run
//! (graph, collect workers, apply consumer) holds a clone and checks it at
//! checkpoints. States:
//!
//! ```text
//! Created -> Running -> { Canceled, Stopped }
//! ```
//!
//! `cancel` is idempotent and safe from any thread; the first cause/reason
//! is retained for diagnostics and later calls do not overwrite it. `stop`
//! is called only by the owning run on normal completion. Terminal states
//! never reactivate; a fresh run always gets a fresh token.
//!
//! The token has no side effects beyond the state transition: it does not
//! stop threads. Pass implementations must poll it (via [`CancelToken::check`])
//! at reasonable intervals so cancellation is observed promptly.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

const STATE_CREATED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_CANCELED: u8 = 2;
const STATE_STOPPED: u8 = 3;

/// Observable token state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelState {
    Created,
    Running,
    Canceled,
    Stopped,
}

/// Marker error returned by [`CancelToken::check`] at checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canceled;

impl fmt::Display for Canceled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("canceled")
    }
}

impl std::error::Error for Canceled {}

/// Why a token was canceled: a human-readable reason plus, for node
/// failures, the originating error.
#[derive(Debug, Clone)]
pub struct CancelCause {
    reason: String,
    source: Option<Arc<anyhow::Error>>,
}

impl CancelCause {
    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn source(&self) -> Option<&anyhow::Error> {
        self.source.as_deref()
    }
}

struct TokenInner {
    state: AtomicU8,
    /// First cancellation cause. Written only by the cancel call that wins
    /// the state transition; the lock is held across the transition so a
    /// reader that observed `Canceled` always sees the cause.
    cause: Mutex<Option<CancelCause>>,
}

/// Cheaply cloneable handle to one run's cancellation state.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken {
            inner: Arc::new(TokenInner {
                state: AtomicU8::new(STATE_CREATED),
                cause: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> CancelState {
        match self.inner.state.load(Ordering::Acquire) {
            STATE_CREATED => CancelState::Created,
            STATE_RUNNING => CancelState::Running,
            STATE_CANCELED => CancelState::Canceled,
            _ => CancelState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == CancelState::Running
    }

    pub fn is_canceled(&self) -> bool {
        self.state() == CancelState::Canceled
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == CancelState::Stopped
    }

    /// Transition `Created -> Running`. Returns `false` if the token already
    /// left the Created state (e.g. canceled before the run started).
    pub fn start(&self) -> bool {
        self.inner
            .state
            .compare_exchange(
                STATE_CREATED,
                STATE_RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Cancel with a reason only. Returns `true` if this call performed the
    /// transition, `false` if the token was already terminal.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        self.do_cancel(CancelCause {
            reason: reason.into(),
            source: None,
        })
    }

    /// Cancel with an originating error (node failure path).
    pub fn cancel_with_cause(&self, source: anyhow::Error, reason: impl Into<String>) -> bool {
        self.do_cancel(CancelCause {
            reason: reason.into(),
            source: Some(Arc::new(source)),
        })
    }

    /// Transition `Running -> Stopped`; only the owning run calls this, on
    /// normal completion. A no-op returning `false` if the token was
    /// canceled concurrently, so exactly one of canceled/stopped wins.
    pub fn stop(&self) -> bool {
        self.inner
            .state
            .compare_exchange(
                STATE_RUNNING,
                STATE_STOPPED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// The first cancellation cause, if the token was canceled.
    pub fn cancel_cause(&self) -> Option<CancelCause> {
        self.lock_cause().clone()
    }

    /// Cancellation checkpoint for pass implementations:
    /// `token.check()?` inside `collect()`.
    pub fn check(&self) -> std::result::Result<(), Canceled> {
        if self.is_canceled() { Err(Canceled) } else { Ok(()) }
    }

    fn do_cancel(&self, cause: CancelCause) -> bool {
        // Hold the cause lock across the CAS so the winner's cause is
        // visible to anyone who observed the Canceled state.
        let mut slot = self.lock_cause();
        let won = self
            .inner
            .state
            .compare_exchange(
                STATE_RUNNING,
                STATE_CANCELED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
            || self
                .inner
                .state
                .compare_exchange(
                    STATE_CREATED,
                    STATE_CANCELED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok();
        if won {
            *slot = Some(cause);
        }
        won
    }

    fn lock_cause(&self) -> std::sync::MutexGuard<'_, Option<CancelCause>> {
        self.inner.cause.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        CancelToken::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("CancelToken");
        d.field("state", &self.state());
        if let Some(cause) = self.cancel_cause() {
            d.field("reason", &cause.reason());
        }
        d.finish()
    }
}
