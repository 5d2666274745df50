// src/config/mod.rs

//! Configuration for embedding daemons.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk or a string (`loader.rs`).
//! - Validate basic invariants like queue bounds (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, parse_and_validate};
pub use model::{DaemonConfig, RestartConfig, SchedulerConfig};
pub use validate::validate_config;
