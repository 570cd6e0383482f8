use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use studio_engine::LATE_START_THRESHOLD_MS;

use crate::playback_loop::EVENT_LOG_CAPACITY;

/// Longest allowed reconciliation interval. Anything coarser lets audible
/// drift build up between ticks.
pub const MAX_TICK_INTERVAL_MS: u64 = 99;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid playback config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Playback engine settings, read from `<config dir>/studio/playback.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How often the playback loop reconciles live sources, in milliseconds.
    pub tick_interval_ms: u64,
    /// In-segment offsets below this start from the first sample.
    pub late_start_threshold_ms: f64,
    /// Slots in the command ring feeding the audio thread.
    pub command_capacity: usize,
    /// Playback events kept until drained; the oldest go first. 0 disables the log.
    pub event_log_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 16,
            late_start_threshold_ms: LATE_START_THRESHOLD_MS,
            command_capacity: 256,
            event_log_capacity: EVENT_LOG_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("studio").join("playback.toml"))
    }

    /// Load from the user config file. A missing or unreadable file yields
    /// the defaults.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        match fs::read_to_string(&path) {
            Ok(contents) => Self::from_toml_str(&contents).unwrap_or_else(|err| {
                tracing::warn!(path = %path.display(), %err, "ignoring playback config");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Tick interval clamped to 1..=99 ms.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.clamp(1, MAX_TICK_INTERVAL_MS))
    }

    pub fn late_start_threshold_ms(&self) -> f64 {
        if self.late_start_threshold_ms.is_finite() && self.late_start_threshold_ms >= 0.0 {
            self.late_start_threshold_ms
        } else {
            LATE_START_THRESHOLD_MS
        }
    }
}
