// src/restart/mod.rs

//! Debounced restart coordination.
//!
//! Every restart request for a target pushes that target's next allowed
//! start time out by the configured debounce window, so a burst of requests
//! collapses into one run built from the state of the last request.
//!
//! The policy lives in a pure, synchronous state machine ([`core`]):
//! timestamped events in, commands out, no timers, no channels, no IO. The
//! async shell ([`coordinator`]) owns the control channel, arms one timer
//! for the earliest pending deadline, launches runs through the scheduler,
//! and feeds run lifecycle events back into the core.

pub mod coordinator;
pub mod core;

pub use coordinator::RestartCoordinator;
pub use core::{CoordCommand, CoordEvent, CoordStep, DebounceCore, DirtyRecord, Phase};
