//! Error types for lull-player
//!
//! Two families share this enum:
//! - Transient I/O failures (`Fetch`, `HttpStatus`, `Decode`, `Manifest`,
//!   `UnknownSound`) are logged and absorbed by the buffering and metadata
//!   loops; callers only observe them through state.
//! - Usage errors (`InvalidVolume`, `PlayerStopped`, `SessionStopped`,
//!   `NoEligibleSegment`, ...) abort the call that triggered them.

use thiserror::Error;

/// Main error type for lull-player
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport failure while fetching content
    #[error("Fetch failed for {path}: {reason}")]
    Fetch { path: String, reason: String },

    /// Content store answered with a non-success status
    #[error("Fetch failed for {path}: HTTP {status}")]
    HttpStatus { path: String, status: u16 },

    /// Chunk could not be decoded into a playable buffer
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Sound catalog manifest could not be parsed
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// Sound identifier missing from the catalog manifest
    #[error("Unknown sound: {0}")]
    UnknownSound(String),

    /// Output engine rejected an operation
    #[error("Audio engine error: {0}")]
    Engine(String),

    /// Volume outside [0, 1]
    #[error("Invalid volume: {0} (expected 0.0..=1.0)")]
    InvalidVolume(f32),

    /// Negative or non-finite duration
    #[error("Invalid duration: {0}s")]
    InvalidDuration(f64),

    /// Operation on a stream player after stop()
    #[error("Player has been stopped; create a new player")]
    PlayerStopped,

    /// Operation on a sound session after stop()
    #[error("Session for sound '{0}' has been stopped")]
    SessionStopped(String),

    /// Segment selection found no candidate
    #[error("No eligible segment for sound '{sound_id}' after {previous:?}")]
    NoEligibleSegment {
        sound_id: String,
        previous: Option<String>,
    },
}

impl From<lull_common::Error> for Error {
    fn from(err: lull_common::Error) -> Self {
        match err {
            lull_common::Error::InvalidVolume(v) => Error::InvalidVolume(v),
            lull_common::Error::InvalidDuration(d) => Error::InvalidDuration(d),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Convenience Result type using lull-player Error
pub type Result<T> = std::result::Result<T, Error>;
