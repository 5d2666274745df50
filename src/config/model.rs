// src/config/model.rs

use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [scheduler]
/// apply_queue_depth = 64
///
/// [restart]
/// debounce_ms = 100
/// ```
///
/// All sections are optional and have reasonable defaults, so an empty file
/// (or no file at all, via `DaemonConfig::default()`) is a valid
/// configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
    /// Scheduler tunables from `[scheduler]`.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Restart coordinator tunables from `[restart]`.
    #[serde(default)]
    pub restart: RestartConfig,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Capacity of the serialized apply queue.
    ///
    /// Collect workers block when the queue is full, which back-pressures
    /// collection against the single apply consumer.
    #[serde(default = "default_apply_queue_depth")]
    pub apply_queue_depth: usize,
}

fn default_apply_queue_depth() -> usize {
    64
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            apply_queue_depth: default_apply_queue_depth(),
        }
    }
}

/// `[restart]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RestartConfig {
    /// Debounce window in milliseconds.
    ///
    /// Every restart request pushes a target's next allowed start to
    /// `now + debounce_ms`. A value of `0` disables debouncing.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
    100
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl RestartConfig {
    /// The debounce window as a [`Duration`].
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
