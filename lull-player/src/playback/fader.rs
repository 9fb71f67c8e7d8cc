//! Engine-clock gain ramps
//!
//! Fades are driven by the output engine's clock, not wall-clock timers: a
//! suspended engine stops its clock, so a fade simply holds its position until
//! the engine resumes. Timers only decide how often the gain is refreshed.

use std::time::Duration;

use lull_common::volume::linear_ramp;

use crate::audio::{GainNode, OutputEngine};

/// Ramp `output` linearly from its current gain to `target` over `duration` engine seconds.
///
/// Returns once the gain has been set exactly to `target`.
pub async fn ramp(
    engine: &dyn OutputEngine,
    output: &dyn GainNode,
    target: f32,
    duration: f64,
    step: Duration,
) {
    let from = output.gain();
    let start = engine.current_time();

    loop {
        let elapsed = engine.current_time() - start;
        let gain = linear_ramp(from, target, elapsed, duration);
        if elapsed >= duration || gain == target {
            output.set_gain(target);
            return;
        }
        output.set_gain(gain);
        tokio::time::sleep(step).await;
    }
}
