// src/graph/mod.rs

//! Per-run pass graph construction.
//!
//! - [`node`] holds the frozen per-pass node type with its atomic
//!   predecessor counter and successor lists.
//! - [`build`] turns a flat pass collection into a [`BuiltGraph`],
//!   rejecting malformed id sets and cyclic dependency declarations.
//! - [`verify`] contains a consistency check over a freshly built graph,
//!   run automatically in debug builds.

pub mod build;
pub mod node;
pub mod verify;

pub use build::{build_graph, BuiltGraph};
pub use node::{NodeKind, PassNode};
pub use verify::check_consistency;
