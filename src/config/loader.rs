// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::DaemonConfig;
use crate::config::validate::validate_config;
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw
/// `DaemonConfig`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation (queue bounds, etc.). Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<DaemonConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: DaemonConfig = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and run basic validation.
///
/// This is the recommended entry point for embedders:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks numeric bounds.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<DaemonConfig> {
    let config = load_from_path(&path)?;
    validate_config(&config)?;
    Ok(config)
}

/// Parse a configuration from an in-memory TOML string and validate it.
///
/// Useful for embedders that carry their tunables inside a larger
/// configuration file.
pub fn parse_and_validate(contents: &str) -> Result<DaemonConfig> {
    let config: DaemonConfig = toml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}
