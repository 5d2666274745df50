// src/pass.rs

//! The `Pass` contract: the unit of analysis work the scheduler orders and
//! runs. Passes are produced by an external factory ([`PassSource`]), carry
//! declared ordering dependencies on other passes, and execute in two
//! phases: `collect` (parallel, cancellable) then `apply` (serialized).

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::cancel::{CancelToken, Canceled};
use crate::types::TargetId;

/// Identifier of a pass, unique within one run.
///
/// The raw value `0` is reserved for "not yet assigned" and rejected at
/// graph build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub u32);

impl PassId {
    pub const UNASSIGNED: PassId = PassId(0);

    pub fn is_assigned(self) -> bool {
        self != Self::UNASSIGNED
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque result of a pass's collect phase, handed unchanged to its apply
/// phase.
pub type PassPayload = Box<dyn Any + Send>;

/// Outcome of a collect phase that did not produce a payload.
#[derive(Debug, Error)]
pub enum PassError {
    /// The run's token was observed canceled mid-phase. An expected outcome:
    /// never logged as an error, the restart path decides what happens next.
    #[error("canceled")]
    Canceled,

    /// Unexpected failure. Cancels the whole run with this error as cause.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl From<Canceled> for PassError {
    fn from(_: Canceled) -> Self {
        PassError::Canceled
    }
}

/// A unit of incremental analysis work.
///
/// Ordering is declared from the successor side:
/// - `completion_predecessors`: this pass's collect may only start after the
///   named passes' apply phases have finished.
/// - `starting_predecessors`: this pass's collect may only start after the
///   named passes' collect phases have started (overlap permitted).
///
/// Ids referencing passes not present in the run's set register no edge;
/// that is the normal shape when an up-to-date predecessor was filtered out
/// before the graph was built.
///
/// `collect` runs on a shared worker pool and must poll the token at
/// reasonable intervals (`token.check()?`); cancellation is cooperative.
/// `apply` invocations are never concurrent, across all runs.
pub trait Pass: Send + Sync {
    fn id(&self) -> PassId;

    fn completion_predecessors(&self) -> &[PassId] {
        &[]
    }

    fn starting_predecessors(&self) -> &[PassId] {
        &[]
    }

    /// Gather analysis results without touching shared result storage.
    fn collect(&self, token: &CancelToken) -> std::result::Result<PassPayload, PassError>;

    /// Publish the collected results. Serialized across all runs; failures
    /// cancel the owning run.
    fn apply(&self, payload: PassPayload) -> anyhow::Result<()>;
}

/// External pass factory: computes the set of passes to run for a target at
/// the moment the restart coordinator decides a run is due.
pub trait PassSource: Send + Sync {
    fn passes_for(&self, target: &TargetId) -> Vec<Arc<dyn Pass>>;
}
