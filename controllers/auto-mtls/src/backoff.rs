//! # Fibonacci Backoff
//!
//! Progressive retry delays for reconciles that fail or are still waiting on
//! an asynchronous dependency (the signer populating a secret). Grows more
//! slowly than exponential backoff.
//!
//! Sequence with the controller defaults: 5s, 5s, 10s, 15s, 25s, 40s, 65s, ... 300s (max).

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Smallest retry delay in seconds
pub const MIN_BACKOFF_SECS: u64 = 5;

/// Largest retry delay in seconds
pub const MAX_BACKOFF_SECS: u64 = 300;

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two, capped at `max_seconds`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Previous backoff value in seconds
    prev_seconds: u64,
    /// Current backoff value in seconds
    current_seconds: u64,
    /// Maximum backoff value in seconds
    max_seconds: u64,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff with minimum and maximum values in seconds
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            prev_seconds: 0,
            current_seconds: min_seconds,
            max_seconds,
        }
    }

    /// Get the next backoff duration in seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_seconds;
        let next = self.prev_seconds.saturating_add(self.current_seconds);
        self.prev_seconds = self.current_seconds;
        self.current_seconds = next.min(self.max_seconds);
        result
    }

    /// Get the next backoff duration as a `Duration` and advance the sequence
    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }
}

/// Backoff state for one object
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    attempts: u32,
}

/// Per-object retry delays, keyed by `kind/namespace/name`.
///
/// Lives in the dispatch layer so reconcilers stay stateless. An entry is
/// dropped as soon as its object settles.
#[derive(Debug)]
pub struct RetryTracker {
    min_seconds: u64,
    max_seconds: u64,
    states: Mutex<HashMap<String, BackoffState>>,
}

impl Default for RetryTracker {
    fn default() -> Self {
        Self::new(MIN_BACKOFF_SECS, MAX_BACKOFF_SECS)
    }
}

impl RetryTracker {
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            max_seconds,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Next delay for `key`, advancing its sequence.
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let state = states.entry(key.to_string()).or_insert_with(|| BackoffState {
            backoff: FibonacciBackoff::new(self.min_seconds, self.max_seconds),
            attempts: 0,
        });
        state.attempts = state.attempts.saturating_add(1);
        state.backoff.next_backoff()
    }

    /// Consecutive retries recorded for `key`.
    pub fn attempts(&self, key: &str) -> u32 {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, |s| s.attempts)
    }

    /// Forget `key` after a settled reconcile.
    pub fn reset(&self, key: &str) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(5, 60);

        assert_eq!(backoff.next_backoff_seconds(), 5);
        assert_eq!(backoff.next_backoff_seconds(), 5);
        assert_eq!(backoff.next_backoff_seconds(), 10);
        assert_eq!(backoff.next_backoff_seconds(), 15);
        assert_eq!(backoff.next_backoff_seconds(), 25);
        assert_eq!(backoff.next_backoff_seconds(), 40);
        // 65 is capped
        assert_eq!(backoff.next_backoff_seconds(), 60);
        assert_eq!(backoff.next_backoff_seconds(), 60);
    }

    #[test]
    fn test_tracker_is_per_key() {
        let tracker = RetryTracker::new(1, 10);

        assert_eq!(tracker.next_delay("Service/a/x"), Duration::from_secs(1));
        assert_eq!(tracker.next_delay("Service/a/x"), Duration::from_secs(1));
        assert_eq!(tracker.next_delay("Service/a/x"), Duration::from_secs(2));
        assert_eq!(tracker.next_delay("Service/a/y"), Duration::from_secs(1));
        assert_eq!(tracker.attempts("Service/a/x"), 3);

        tracker.reset("Service/a/x");
        assert_eq!(tracker.attempts("Service/a/x"), 0);
        assert_eq!(tracker.next_delay("Service/a/x"), Duration::from_secs(1));
    }
}
