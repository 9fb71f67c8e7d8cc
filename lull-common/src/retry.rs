//! Capped exponential backoff
//!
//! Used for loads that must eventually succeed (sound catalog metadata):
//! the first retry waits `initial`, each following retry doubles the delay,
//! and the delay never exceeds `max`.

use std::time::Duration;

/// Default first retry delay
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Default delay cap
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Backoff schedule for one retried operation
#[derive(Debug, Clone)]
pub struct Backoff {
    max: Duration,
    next: Duration,
    attempt: u32,
}

impl Backoff {
    /// Create a backoff starting at `initial`, doubling, capped at `max`.
    ///
    /// A cap below `initial` is raised to `initial`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            max,
            next: initial,
            attempt: 0,
        }
    }

    /// Delay to wait before the next retry; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Number of delays handed out so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY)
    }
}
