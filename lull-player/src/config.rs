//! Configuration for the Lull player
//!
//! All runtime configuration lives in memory and is changed through setters on
//! the manager, sessions and players. This module only provides typed
//! defaults and an optional TOML seed:
//!
//! ```toml
//! [stream]
//! lookahead_secs = 20.0
//! tick_interval_ms = 100
//!
//! [session]
//! fade_in_secs = 3.0
//! bitrate_kbps = 256
//! premium = true
//! ```
//!
//! Missing sections and keys fall back to built-in defaults.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LullConfig {
    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

/// Segment stream player tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Scheduled-but-unplayed audio the buffering loop tries to keep (seconds)
    #[serde(default = "default_lookahead_secs")]
    pub lookahead_secs: f64,

    /// Delay between buffering loop iterations
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Delay used when the lookahead window is already full
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,

    /// Gain update period while a fade is running
    #[serde(default = "default_fade_step_ms")]
    pub fade_step_ms: u64,
}

/// Sound session behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_fade_secs")]
    pub fade_in_secs: f64,

    #[serde(default = "default_fade_secs")]
    pub fade_out_secs: f64,

    /// Fixed short fade applied on volume changes (avoids clicks)
    #[serde(default = "default_volume_fade_secs")]
    pub volume_fade_secs: f64,

    #[serde(default = "default_bitrate_kbps")]
    pub bitrate_kbps: u32,

    /// Premium access tier enabled
    #[serde(default)]
    pub premium: bool,

    /// Path of the sound catalog manifest in the content store
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,

    /// Lower bound of a silence gap for non-contiguous sounds (seconds)
    #[serde(default = "default_min_silence_secs")]
    pub min_silence_secs: f64,

    /// First metadata retry delay
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,

    /// Metadata retry delay cap
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
}

fn default_lookahead_secs() -> f64 {
    20.0
}

fn default_tick_interval_ms() -> u64 {
    100
}

fn default_idle_backoff_ms() -> u64 {
    1000
}

fn default_fade_step_ms() -> u64 {
    20
}

fn default_fade_secs() -> f64 {
    2.0
}

fn default_volume_fade_secs() -> f64 {
    0.1
}

fn default_bitrate_kbps() -> u32 {
    128
}

fn default_catalog_path() -> String {
    "catalog.json".to_string()
}

fn default_min_silence_secs() -> f64 {
    30.0
}

fn default_retry_initial_ms() -> u64 {
    1000
}

fn default_retry_max_ms() -> u64 {
    30_000
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            lookahead_secs: default_lookahead_secs(),
            tick_interval_ms: default_tick_interval_ms(),
            idle_backoff_ms: default_idle_backoff_ms(),
            fade_step_ms: default_fade_step_ms(),
        }
    }
}

impl StreamConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    pub fn fade_step(&self) -> Duration {
        Duration::from_millis(self.fade_step_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            fade_in_secs: default_fade_secs(),
            fade_out_secs: default_fade_secs(),
            volume_fade_secs: default_volume_fade_secs(),
            bitrate_kbps: default_bitrate_kbps(),
            premium: false,
            catalog_path: default_catalog_path(),
            min_silence_secs: default_min_silence_secs(),
            retry_initial_ms: default_retry_initial_ms(),
            retry_max_ms: default_retry_max_ms(),
        }
    }
}

impl SessionConfig {
    pub fn retry_initial(&self) -> Duration {
        Duration::from_millis(self.retry_initial_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }
}

impl LullConfig {
    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: LullConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject values the player cannot run with
    pub fn validate(&self) -> Result<()> {
        let stream = &self.stream;
        if !(stream.lookahead_secs.is_finite() && stream.lookahead_secs > 0.0) {
            return Err(Error::Config(format!(
                "stream.lookahead_secs must be positive, got {}",
                stream.lookahead_secs
            )));
        }
        if stream.tick_interval_ms == 0 || stream.idle_backoff_ms == 0 || stream.fade_step_ms == 0 {
            return Err(Error::Config(
                "stream intervals (tick_interval_ms, idle_backoff_ms, fade_step_ms) must be non-zero"
                    .to_string(),
            ));
        }

        let session = &self.session;
        for (name, value) in [
            ("fade_in_secs", session.fade_in_secs),
            ("fade_out_secs", session.fade_out_secs),
            ("volume_fade_secs", session.volume_fade_secs),
            ("min_silence_secs", session.min_silence_secs),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(Error::Config(format!(
                    "session.{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        if session.bitrate_kbps == 0 {
            return Err(Error::Config("session.bitrate_kbps must be non-zero".to_string()));
        }
        if session.retry_max_ms < session.retry_initial_ms {
            return Err(Error::Config(format!(
                "session.retry_max_ms ({}) must be >= retry_initial_ms ({})",
                session.retry_max_ms, session.retry_initial_ms
            )));
        }
        Ok(())
    }
}
