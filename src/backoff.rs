//! Exponential backoff for the sandbox-creation contention loop.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff with jitter and a bounded number of attempts.
///
/// The schedule doubles from `initial` up to `max`; each delay handed to the
/// caller is drawn uniformly from a ±`jitter` band around the schedule value
/// so concurrent waiters do not reconverge on the lock in lockstep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentionBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    jitter: f64,
    attempt: u32,
    limit: u32,
}

impl ContentionBackoff {
    /// Creates a backoff starting at `initial`, capping at `max`, allowing
    /// `limit` retries before [`exhausted`](Self::exhausted) reports true.
    pub fn new(initial: Duration, max: Duration, limit: u32) -> Self {
        Self {
            initial,
            max,
            current: initial,
            jitter: 0.1,
            attempt: 0,
            limit,
        }
    }

    /// Returns the current un-jittered backoff duration.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Returns how many delays have been taken so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// True once the retry ceiling has been consumed.
    pub fn exhausted(&self) -> bool {
        self.attempt >= self.limit
    }

    /// Draws a jittered delay around the current schedule value.
    pub fn jittered(&self) -> Duration {
        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        self.current.mul_f64(factor)
    }

    /// Advances to the next backoff interval (doubles, capped at max) and
    /// charges one attempt against the ceiling.
    pub fn next(&mut self) {
        self.current = (self.current * 2).min(self.max);
        self.attempt += 1;
    }

    /// Resets the schedule and the attempt counter.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempt = 0;
    }
}
