//! # Fibonacci Backoff
//!
//! Provides a Fibonacci-based backoff mechanism for reconcile retries.
//! It grows more slowly than exponential backoff, which suits conflicts and
//! transient store errors that usually clear after one or two attempts.
//!
//! Sequence with the controller defaults: 1s, 1s, 2s, 3s, 5s, 8s, ... capped at 300s.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

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
    /// Create a new Fibonacci backoff with the given minimum and maximum in seconds
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
        let next = self.prev_seconds + self.current_seconds;
        self.prev_seconds = self.current_seconds;
        self.current_seconds = std::cmp::min(next, self.max_seconds);
        result
    }

    /// Get the next backoff duration as a `Duration` and advance the sequence
    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }
}

/// Per-object backoff state, keyed by `namespace/name`
///
/// The dispatcher calls `next` from its error policy and `reset` after each
/// successful reconcile, so one object's failures never slow another down.
#[derive(Debug)]
pub struct BackoffTracker {
    min_seconds: u64,
    max_seconds: u64,
    entries: Mutex<HashMap<String, FibonacciBackoff>>,
}

impl BackoffTracker {
    /// Create a tracker handing out sequences from `min_seconds` to `max_seconds`
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            max_seconds,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Next requeue delay for `key`
    pub fn next(&self, key: &str) -> Duration {
        let mut entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries
            .entry(key.to_string())
            .or_insert_with(|| FibonacciBackoff::new(self.min_seconds, self.max_seconds))
            .next_backoff()
    }

    /// Forget the failure history of `key`; its next failure starts the
    /// sequence over
    pub fn reset(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.remove(key);
    }
}

impl Default for BackoffTracker {
    fn default() -> Self {
        Self::new(1, 300)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(1, 300);

        assert_eq!(backoff.next_backoff_seconds(), 1);
        assert_eq!(backoff.next_backoff_seconds(), 1);
        assert_eq!(backoff.next_backoff_seconds(), 2);
        assert_eq!(backoff.next_backoff_seconds(), 3);
        assert_eq!(backoff.next_backoff_seconds(), 5);
        assert_eq!(backoff.next_backoff_seconds(), 8);
    }

    #[test]
    fn test_fibonacci_backoff_max_cap() {
        let mut backoff = FibonacciBackoff::new(1, 5);

        assert_eq!(backoff.next_backoff_seconds(), 1);
        assert_eq!(backoff.next_backoff_seconds(), 1);
        assert_eq!(backoff.next_backoff_seconds(), 2);
        assert_eq!(backoff.next_backoff_seconds(), 3);
        assert_eq!(backoff.next_backoff_seconds(), 5);
        // Next would be 8 (5+3), but should be capped at 5
        assert_eq!(backoff.next_backoff_seconds(), 5);
        assert_eq!(backoff.next_backoff_seconds(), 5);
    }

    #[test]
    fn test_tracker_keys_are_independent() {
        let tracker = BackoffTracker::new(1, 300);

        assert_eq!(tracker.next("default/a"), Duration::from_secs(1));
        assert_eq!(tracker.next("default/a"), Duration::from_secs(1));
        assert_eq!(tracker.next("default/a"), Duration::from_secs(2));
        assert_eq!(tracker.next("default/b"), Duration::from_secs(1));
    }

    #[test]
    fn test_tracker_reset_restarts_sequence() {
        let tracker = BackoffTracker::new(1, 300);

        tracker.next("default/a");
        tracker.next("default/a");
        tracker.next("default/a");
        tracker.reset("default/a");

        assert_eq!(tracker.next("default/a"), Duration::from_secs(1));
    }
}
