// src/sched/mod.rs

//! Run scheduling and execution.
//!
//! - [`executor`] owns the scheduler service: run launching, the per-target
//!   single-flight registry, and the serialized apply consumer.
//! - [`run`] holds the per-run state (token, node arena, countdown) and the
//!   event routing between nodes.
//! - [`worker`] drives one node's collect phase on the blocking pool.
//! - [`events`] defines the run lifecycle listener trait.

pub mod events;
pub mod executor;
pub mod run;
pub mod worker;

pub use events::RunListener;
pub use executor::PassScheduler;
pub use run::RunHandle;
