// src/config/validate.rs

use crate::config::model::DaemonConfig;
use crate::errors::{PassdagError, Result};

/// Run basic semantic validation against a loaded configuration.
///
/// This checks:
/// - `apply_queue_depth >= 1`
///
/// Pass graphs are validated separately at run launch, where the actual pass
/// set is known.
pub fn validate_config(cfg: &DaemonConfig) -> Result<()> {
    if cfg.scheduler.apply_queue_depth == 0 {
        return Err(PassdagError::ConfigError(
            "[scheduler].apply_queue_depth must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(())
}
