//! Volume validation and gain curves
//!
//! Two separate curves are in play:
//! - Mixing: a sound's effective gain is `(master * own)^2`, a quadratic
//!   perceptual curve, clamped to [0, 1].
//! - Fading: an explicit fade moves gain linearly in time from its current
//!   value to the target ([`linear_ramp`]).

use crate::{Error, Result};

/// Validate a volume at a setter boundary.
///
/// Out-of-range and NaN values are rejected rather than clamped.
pub fn validate_volume(volume: f32) -> Result<f32> {
    if (0.0..=1.0).contains(&volume) {
        Ok(volume)
    } else {
        Err(Error::InvalidVolume(volume))
    }
}

/// Validate a fade or timer duration in seconds
pub fn validate_duration(seconds: f64) -> Result<f64> {
    if seconds.is_finite() && seconds >= 0.0 {
        Ok(seconds)
    } else {
        Err(Error::InvalidDuration(seconds))
    }
}

/// Effective gain for a sound: `(master * own)^2`, clamped to [0, 1]
pub fn perceptual_gain(master: f32, own: f32) -> f32 {
    let product = master * own;
    (product * product).clamp(0.0, 1.0)
}

/// Gain at `elapsed` seconds into a linear fade from `from` to `to` lasting `duration`.
///
/// Returns exactly `to` once the fade has elapsed (or for zero-length fades).
pub fn linear_ramp(from: f32, to: f32, elapsed: f64, duration: f64) -> f32 {
    if duration <= 0.0 || elapsed >= duration {
        return to;
    }
    let progress = (elapsed.max(0.0) / duration) as f32;
    from + (to - from) * progress
}
