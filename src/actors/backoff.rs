//! Exponential backoff between reconnection attempts
//!
//! ```text
//! delay[n] = min(initial * multiplier^(n-1), max)
//! ```
//!
//! With the defaults (1s, x2, 60s) the broker actor waits 1s, 2s, 4s, ... and then
//! 60s between attempts until a connection is acknowledged again.

use std::time::Duration;

pub const DEFAULT_MULTIPLIER: f64 = 2.0;

#[derive(Debug, Clone)]
pub struct Backoff {
    initial_delay: Duration,
    current_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    attempt: u32,
}

impl Backoff {
    /// Creates a backoff controller
    ///
    /// A `max` below `initial` is raised to `initial`, and a multiplier below 1.0 is
    /// treated as 1.0 (constant delay).
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        let max = max.max(initial);
        Self {
            initial_delay: initial,
            current_delay: initial,
            max_delay: max,
            multiplier: multiplier.max(1.0),
            attempt: 0,
        }
    }

    pub fn from_secs_f64(initial: f64, max: f64) -> Self {
        Self::new(
            Duration::from_secs_f64(initial),
            Duration::from_secs_f64(max),
            DEFAULT_MULTIPLIER,
        )
    }

    /// Returns the delay before the next attempt and advances the schedule
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_delay;
        self.attempt = self.attempt.saturating_add(1);

        let next = self.current_delay.as_secs_f64() * self.multiplier;
        self.current_delay = Duration::from_secs_f64(next.min(self.max_delay.as_secs_f64()));

        delay
    }

    /// Back to the initial delay, called once a connection succeeds
    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.attempt = 0;
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(1),
            Duration::from_secs(60),
            DEFAULT_MULTIPLIER,
        )
    }
}
