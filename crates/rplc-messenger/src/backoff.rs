use std::time::{Duration, Instant};

/// Exponential reconnect backoff for a single worker connection, matching
/// the "doubles up to a ceiling" reconnect discipline described for the
/// messenger in spec.md §4.1.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Resets the backoff after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Returns the delay to wait before the next attempt and doubles the
    /// internal counter, capped at `max`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(30))
    }
}

/// Tracks when a backing-off worker connection becomes eligible for retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryGate {
    backoff: Backoff,
    not_before: Instant,
}

impl RetryGate {
    pub fn new(backoff: Backoff, now: Instant) -> Self {
        Self { backoff, not_before: now }
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        now >= self.not_before
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.not_before = now + self.backoff.next_delay();
    }

    pub fn record_success(&mut self) {
        self.backoff.reset();
    }

    pub fn not_before(&self) -> Instant {
        self.not_before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_ceiling() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(450));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(), Duration::from_millis(450));
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }
}
