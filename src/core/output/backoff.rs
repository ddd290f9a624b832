//! Reconnect holdoff for the InfluxDB transport.
//!
//! The sampling loop never sleeps waiting for the database. Instead, after a
//! failed write the transport records the failure and refuses to reconnect
//! until the holdoff expires; ticks arriving in between are dropped.
//!
//! The holdoff grows exponentially with every consecutive failure:
//!
//! ```text
//! holdoff[n] = min(initial * multiplier^(n-1), max)
//! ```
//!
//! and goes back to `initial` after the first successful write.

use std::time::{Duration, Instant};

/// Exponential reconnect holdoff.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_delay: Duration,
    current_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    /// Consecutive failures since the last success.
    attempt: u32,
    /// Reconnecting is not allowed before this instant.
    not_before: Option<Instant>,
}

impl Backoff {
    /// Creates a holdoff growing from `initial` to `max`.
    ///
    /// A `multiplier` below 1.0 is treated as 1.0 (constant holdoff), and
    /// `max` is raised to `initial` when smaller.
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay: initial,
            current_delay: initial,
            max_delay: max.max(initial),
            multiplier: multiplier.max(1.0),
            attempt: 0,
            not_before: None,
        }
    }

    /// Registers a failed attempt at `now` and returns the holdoff applied.
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let holdoff = self.current_delay;
        self.not_before = Some(now + holdoff);

        let next = self.current_delay.as_secs_f64() * self.multiplier;
        self.current_delay = Duration::from_secs_f64(next.min(self.max_delay.as_secs_f64()));

        holdoff
    }

    /// Clears the failure history after a successful attempt.
    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.attempt = 0;
        self.not_before = None;
    }

    /// True when a new attempt may be made at `now`.
    pub fn ready(&self, now: Instant) -> bool {
        self.not_before.map_or(true, |t| now >= t)
    }

    /// Time left before the next attempt is allowed.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.not_before
            .map(|t| t.saturating_duration_since(now))
            .unwrap_or_default()
    }

    /// Number of consecutive failures.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Holdoff the next failure will apply.
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

impl Default for Backoff {
    /// One second, doubling up to one minute.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_default_creation() {
        let backoff = Backoff::default();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.current_delay(), Duration::from_secs(1));
        assert_eq!(backoff.max_delay(), Duration::from_secs(60));
        assert!(backoff.ready(Instant::now()));
    }

    #[test]
    fn test_backoff_holdoff_progression() {
        let mut backoff = Backoff::default();
        let now = Instant::now();

        assert_eq!(backoff.record_failure(now), Duration::from_secs(1));
        assert_eq!(backoff.record_failure(now), Duration::from_secs(2));
        assert_eq!(backoff.record_failure(now), Duration::from_secs(4));
        assert_eq!(backoff.attempt(), 3);
    }

    #[test]
    fn test_backoff_respects_max_delay() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10), 3.0);
        let now = Instant::now();

        let mut last = Duration::ZERO;
        for _ in 0..10 {
            last = backoff.record_failure(now);
        }
        assert_eq!(last, Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_blocks_until_holdoff_expires() {
        let mut backoff = Backoff::default();
        let now = Instant::now();
        backoff.record_failure(now);

        assert!(!backoff.ready(now));
        assert!(!backoff.ready(now + Duration::from_millis(999)));
        assert!(backoff.ready(now + Duration::from_secs(1)));
        assert_eq!(
            backoff.remaining(now + Duration::from_millis(250)),
            Duration::from_millis(750)
        );
        assert_eq!(backoff.remaining(now + Duration::from_secs(5)), Duration::ZERO);
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::default();
        let now = Instant::now();
        backoff.record_failure(now);
        backoff.record_failure(now);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.current_delay(), Duration::from_secs(1));
        assert!(backoff.ready(now));
    }

    #[test]
    fn test_backoff_edge_case_invalid_parameters() {
        let mut constant = Backoff::new(Duration::from_secs(2), Duration::from_secs(10), 0.5);
        let now = Instant::now();
        assert_eq!(constant.record_failure(now), Duration::from_secs(2));
        assert_eq!(constant.record_failure(now), Duration::from_secs(2));

        let inverted = Backoff::new(Duration::from_secs(10), Duration::from_secs(1), 2.0);
        assert_eq!(inverted.max_delay(), Duration::from_secs(10));
    }
}
