//! Bounded exponential backoff for retrying transient port failures.

use std::time::Duration;

/// Doubling delay sequence capped at a maximum.
///
/// The first call to [`next_delay`](Backoff::next_delay) returns the initial
/// interval. Each following call doubles it until `max` is reached.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Creates a backoff. An initial interval above `max` is clamped.
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Returns the delay to wait before the next attempt and advances.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Starts the sequence over after a success.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}
