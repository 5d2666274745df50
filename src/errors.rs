// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::pass::PassId;

#[derive(Error, Debug)]
pub enum PassdagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// A pass in the supplied set carries the reserved "not yet assigned" id.
    #[error("pass id {0} is reserved for \"not yet assigned\"; declare a non-zero id")]
    UnassignedPassId(PassId),

    /// Two passes in one run declared the same id.
    #[error("duplicate pass id {0} within one run")]
    DuplicatePassId(PassId),

    /// The declared predecessor edges do not form a DAG.
    #[error("cycle detected in pass dependency graph involving pass {0}")]
    DependencyCycle(PassId),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PassdagError>;
