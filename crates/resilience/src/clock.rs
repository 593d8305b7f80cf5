//! Time abstraction for deterministic testing
//!
//! The circuit breaker decides when to probe recovery by comparing the
//! current time against the last failure. Production code uses the real
//! monotonic clock; tests inject a [`MockClock`] and advance it explicitly
//! instead of sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trait for time observation.
pub trait Clock: Send + Sync + 'static {
    /// Get the current instant (monotonic time).
    fn now(&self) -> Instant;
}

/// Real system clock for production use.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Mock clock for deterministic testing.
///
/// Clones share the same underlying elapsed counter, so a test can hold one
/// handle while a circuit breaker holds another and both observe the same
/// timeline.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed_millis: Arc<AtomicU64>,
}

impl MockClock {
    /// Create a new mock clock starting at the current instant.
    pub fn new() -> Self {
        Self { start: Instant::now(), elapsed_millis: Arc::new(AtomicU64::new(0)) }
    }

    /// Advance the mock clock by a duration without sleeping.
    pub fn advance(&self, duration: Duration) {
        self.elapsed_millis.fetch_add(duration.as_millis() as u64, Ordering::Release);
    }

    /// Advance the mock clock by milliseconds (convenience method).
    pub fn advance_millis(&self, millis: u64) {
        self.elapsed_millis.fetch_add(millis, Ordering::Release);
    }

    /// Get the elapsed time observed so far.
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_millis.load(Ordering::Acquire))
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates the system clock advances monotonically.
    #[test]
    fn test_system_clock_now() {
        let clock = SystemClock;
        let now1 = clock.now();
        let now2 = clock.now();
        assert!(now2 >= now1, "System clock should advance");
    }

    /// Validates `MockClock::new` starts at zero elapsed time.
    #[test]
    fn test_mock_clock_new() {
        let clock = MockClock::new();
        assert_eq!(clock.elapsed(), Duration::ZERO, "New mock clock should start at zero");
    }

    /// Validates `MockClock::advance` moves `now` by the given duration.
    #[test]
    fn test_mock_clock_advance() {
        let clock = MockClock::new();
        let start = clock.now();

        clock.advance(Duration::from_secs(5));
        let after = clock.now();

        assert_eq!(after.duration_since(start), Duration::from_secs(5));
    }

    /// Validates clones observe the same timeline.
    #[test]
    fn test_mock_clock_clone_shares_time() {
        let clock1 = MockClock::new();
        clock1.advance(Duration::from_secs(10));

        let clock2 = clock1.clone();
        assert_eq!(clock2.elapsed(), Duration::from_secs(10));

        clock2.advance_millis(5_000);
        assert_eq!(clock1.elapsed(), Duration::from_secs(15));
        assert_eq!(clock2.elapsed(), Duration::from_secs(15));
    }
}
