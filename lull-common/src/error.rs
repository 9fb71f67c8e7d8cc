//! Common error types for Lull

use thiserror::Error;

/// Common result type for Lull operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the player components
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Volume outside the inclusive range [0, 1] (or NaN)
    #[error("Invalid volume: {0} (expected 0.0..=1.0)")]
    InvalidVolume(f32),

    /// Negative or non-finite duration in seconds
    #[error("Invalid duration: {0}s")]
    InvalidDuration(f64),
}
