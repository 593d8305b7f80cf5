//! Circuit breaker: fail fast when a downstream resource is unhealthy
//!
//! The breaker is a shared, long-lived state machine. One instance (behind
//! an [`Arc`](std::sync::Arc)) protects one downstream resource and is
//! shared by every concurrent caller of that resource. State and counters
//! live in lock-free atomics; transitions use compare-and-swap on a single
//! state cell. The only mutual-exclusion primitive is the half-open trial
//! gate, acquired with try-lock semantics so contending callers fail fast
//! instead of queueing.
//!
//! There is no background timer: an open breaker moves to half-open lazily,
//! the moment any caller observes that the cool-down has elapsed, either
//! through [`execute`](CircuitBreaker::execute) or an explicit
//! [`state`](CircuitBreaker::state) query.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::constants::{
    DEFAULT_FAILURE_THRESHOLD, DEFAULT_HALF_OPEN_AFTER, DEFAULT_SUCCESS_THRESHOLD,
};
use crate::error::{ConfigError, ConfigResult, FaultError};

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests flow through.
    Closed,
    /// Circuit is open, requests are rejected without execution.
    Open,
    /// Circuit is probing recovery with a single trial call at a time.
    HalfOpen,
}

impl CircuitState {
    fn from_tag(tag: u8) -> Self {
        match tag {
            STATE_OPEN => Self::Open,
            STATE_HALF_OPEN => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker from closed to open.
    pub failure_threshold: u32,
    /// Half-open trial successes needed to close the breaker again.
    pub success_threshold: u32,
    /// Cool-down after the last failure before recovery is probed.
    pub half_open_after: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            half_open_after: DEFAULT_HALF_OPEN_AFTER,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "failure_threshold must be greater than 0".to_string(),
            });
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "success_threshold must be greater than 0".to_string(),
            });
        }
        if self.half_open_after.is_zero() {
            return Err(ConfigError::Invalid {
                message: "half_open_after must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    /// Create a builder seeded with the default configuration.
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    /// Consecutive failures before the breaker opens.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Half-open successes before the breaker closes.
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Cool-down before an open breaker probes recovery.
    pub fn half_open_after(mut self, cooldown: Duration) -> Self {
        self.config.half_open_after = cooldown;
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Point-in-time view of a breaker's counters for monitoring.
#[derive(Debug, Clone)]
pub struct CircuitBreakerSnapshot {
    /// Current state at the time of the snapshot.
    pub state: CircuitState,
    /// Consecutive closed-state failures observed so far.
    pub failure_count: u32,
    /// Half-open trial successes observed so far.
    pub success_count: u32,
    /// Calls admitted (executed) through this breaker.
    pub total_calls: u64,
    /// Calls rejected without execution.
    pub rejected_calls: u64,
}

/// Marker for a call rejected without execution.
pub(crate) struct Rejected;

/// How a call was admitted, deciding which accounting applies afterwards.
enum Admission<'a> {
    /// Admitted through the closed circuit.
    Direct,
    /// Admitted as the single half-open trial; the guard keeps the slot
    /// occupied for the duration of the trial.
    Trial(#[allow(dead_code)] MutexGuard<'a, ()>),
}

/// Process-local circuit breaker shared by all callers of one resource.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    state: AtomicU8,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    total_calls: AtomicU64,
    rejected_calls: AtomicU64,
    /// Milliseconds since `origin` of the most recent recorded failure.
    last_failure_at: AtomicU64,
    origin: Instant,
    trial_gate: Mutex<()>,
    clock: C,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.load_state())
            .field("failure_count", &self.failure_count.load(Ordering::Acquire))
            .field("success_count", &self.success_count.load(Ordering::Acquire))
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker with the given configuration and the system clock.
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }

    /// Create a breaker with the default configuration.
    pub fn with_defaults() -> Self {
        Self {
            config: CircuitBreakerConfig::default(),
            state: AtomicU8::new(STATE_CLOSED),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            total_calls: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            last_failure_at: AtomicU64::new(0),
            origin: Instant::now(),
            trial_gate: Mutex::new(()),
            clock: SystemClock,
        }
    }
}

impl Default for CircuitBreaker<SystemClock> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker with a custom clock (useful for testing).
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;

        let origin = clock.now();
        Ok(Self {
            config,
            state: AtomicU8::new(STATE_CLOSED),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            total_calls: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            last_failure_at: AtomicU64::new(0),
            origin,
            trial_gate: Mutex::new(()),
            clock,
        })
    }

    /// Current state of the breaker.
    ///
    /// Observing an open breaker whose cool-down has elapsed transitions it
    /// to half-open right here; there is no background timer.
    pub fn state(&self) -> CircuitState {
        let state = self.load_state();
        if state != CircuitState::Open || !self.cooldown_elapsed() {
            return state;
        }

        if self
            .state
            .compare_exchange(STATE_OPEN, STATE_HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.success_count.store(0, Ordering::Release);
            info!(cooldown = ?self.config.half_open_after, "circuit breaker half-open, probing recovery");
            return CircuitState::HalfOpen;
        }

        // Lost the transition race; report whatever won.
        self.load_state()
    }

    /// Execute an operation under this breaker's protection.
    ///
    /// Rejected calls fail with [`FaultError::CircuitOpen`] without invoking
    /// the operation; executed calls have their failure wrapped as
    /// [`FaultError::OperationFailed`].
    #[instrument(skip(self, operation))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, FaultError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        match self.execute_raw(operation).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(FaultError::OperationFailed { source: error }),
            Err(Rejected) => Err(FaultError::CircuitOpen),
        }
    }

    /// Admit and run one unit of work, recording its outcome.
    ///
    /// The outer `Err(Rejected)` means the operation was never invoked; the
    /// inner result is the operation's own outcome, already accounted for.
    /// The unit may be a single call or a whole composed retry sequence;
    /// either way it counts once.
    pub(crate) async fn execute_raw<F, Fut, T, X>(
        &self,
        operation: F,
    ) -> Result<Result<T, X>, Rejected>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, X>>,
    {
        let Some(admission) = self.try_admit() else {
            self.rejected_calls.fetch_add(1, Ordering::Relaxed);
            debug!(state = %self.load_state(), "circuit breaker rejecting call");
            return Err(Rejected);
        };

        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let result = operation().await;

        match admission {
            Admission::Direct => match &result {
                Ok(_) => self.on_direct_success(),
                Err(_) => self.on_direct_failure(),
            },
            Admission::Trial(_guard) => match &result {
                Ok(_) => self.on_trial_success(),
                Err(_) => self.on_trial_failure(),
            },
        }

        Ok(result)
    }

    /// Decide whether a call may run right now, without blocking.
    fn try_admit(&self) -> Option<Admission<'_>> {
        loop {
            match self.state() {
                CircuitState::Closed => return Some(Admission::Direct),
                CircuitState::Open => return None,
                CircuitState::HalfOpen => {
                    let Ok(guard) = self.trial_gate.try_lock() else {
                        // Another caller holds the trial slot; fail fast.
                        return None;
                    };
                    if self.load_state() == CircuitState::HalfOpen {
                        return Some(Admission::Trial(guard));
                    }
                    // The state moved while we acquired the gate; drop the
                    // guard and re-evaluate against the current state.
                }
            }
        }
    }

    fn on_direct_success(&self) {
        if self.load_state() == CircuitState::Closed {
            self.failure_count.store(0, Ordering::Release);
        }
    }

    fn on_direct_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        self.stamp_last_failure();

        if failures >= self.config.failure_threshold
            && self
                .state
                .compare_exchange(STATE_CLOSED, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            warn!(failures, "circuit breaker opened after consecutive failures");
        }
    }

    fn on_trial_success(&self) {
        let successes = self.success_count.fetch_add(1, Ordering::AcqRel) + 1;

        if successes >= self.config.success_threshold
            && self
                .state
                .compare_exchange(STATE_HALF_OPEN, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.failure_count.store(0, Ordering::Release);
            info!(successes, "circuit breaker closed after successful recovery trials");
        }
    }

    fn on_trial_failure(&self) {
        self.stamp_last_failure();

        if self
            .state
            .compare_exchange(STATE_HALF_OPEN, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            warn!("circuit breaker re-opened after failed recovery trial");
        }
    }

    /// Unconditionally return to closed with all counters cleared.
    ///
    /// Administrative operation, not part of normal request flow.
    pub fn reset(&self) {
        self.state.store(STATE_CLOSED, Ordering::Release);
        self.failure_count.store(0, Ordering::Release);
        self.success_count.store(0, Ordering::Release);
        self.last_failure_at.store(0, Ordering::Release);
        info!("circuit breaker manually reset to closed state");
    }

    /// Point-in-time counters for monitoring.
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            state: self.state(),
            failure_count: self.failure_count.load(Ordering::Acquire),
            success_count: self.success_count.load(Ordering::Acquire),
            total_calls: self.total_calls.load(Ordering::Acquire),
            rejected_calls: self.rejected_calls.load(Ordering::Acquire),
        }
    }

    fn load_state(&self) -> CircuitState {
        CircuitState::from_tag(self.state.load(Ordering::Acquire))
    }

    fn cooldown_elapsed(&self) -> bool {
        let last_failure = self.last_failure_at.load(Ordering::Acquire);
        let cooldown = self.config.half_open_after.as_millis() as u64;
        self.elapsed_millis() > last_failure.saturating_add(cooldown)
    }

    fn stamp_last_failure(&self) {
        self.last_failure_at.store(self.elapsed_millis(), Ordering::Release);
    }

    fn elapsed_millis(&self) -> u64 {
        self.clock.now().saturating_duration_since(self.origin).as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::MockClock;

    fn failing_op() -> Result<(), std::io::Error> {
        Err(std::io::Error::other("downstream failure"))
    }

    fn breaker_with_clock(
        failure_threshold: u32,
        success_threshold: u32,
        half_open_after: Duration,
        clock: MockClock,
    ) -> CircuitBreaker<MockClock> {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(failure_threshold)
            .success_threshold(success_threshold)
            .half_open_after(half_open_after)
            .build()
            .unwrap();
        CircuitBreaker::with_clock(config, clock).unwrap()
    }

    /// Validates `CircuitState` display strings.
    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "CLOSED");
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
    }

    /// Validates the default configuration matches the documented surface.
    #[test]
    fn test_config_default() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.success_threshold, 1);
        assert_eq!(config.half_open_after, Duration::from_secs(30));
    }

    /// Validates configuration validation rejects zero thresholds and a zero
    /// cool-down.
    #[test]
    fn test_config_validation() {
        assert!(CircuitBreakerConfig::builder().failure_threshold(0).build().is_err());
        assert!(CircuitBreakerConfig::builder().success_threshold(0).build().is_err());
        assert!(CircuitBreakerConfig::builder().half_open_after(Duration::ZERO).build().is_err());
        assert!(CircuitBreakerConfig::builder().build().is_ok());
    }

    /// Validates a new breaker starts closed.
    #[test]
    fn test_starts_closed() {
        let breaker = CircuitBreaker::with_defaults();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    /// Tests the breaker opens once the failure threshold is reached and the
    /// next call is rejected without invoking the operation.
    #[tokio::test]
    async fn test_opens_at_failure_threshold() {
        let breaker = breaker_with_clock(5, 1, Duration::from_secs(30), MockClock::new());

        for _ in 0..5 {
            let result = breaker.execute(|| async { failing_op() }).await;
            assert!(matches!(result, Err(FaultError::OperationFailed { .. })));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let invoked = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let invoked_clone = Arc::clone(&invoked);
        let result = breaker
            .execute(|| async move {
                invoked_clone.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::io::Error>(())
            })
            .await;

        assert!(matches!(result, Err(FaultError::CircuitOpen)));
        assert_eq!(invoked.load(Ordering::SeqCst), 0, "open breaker must not invoke");

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.total_calls, 5);
        assert_eq!(snapshot.rejected_calls, 1);
    }

    /// Tests a success in the closed state resets the failure counter.
    #[tokio::test]
    async fn test_closed_success_resets_failures() {
        let breaker = breaker_with_clock(5, 1, Duration::from_secs(30), MockClock::new());

        for _ in 0..4 {
            let _ = breaker.execute(|| async { failing_op() }).await;
        }
        assert_eq!(breaker.snapshot().failure_count, 4);

        let result = breaker.execute(|| async { Ok::<_, std::io::Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(breaker.snapshot().failure_count, 0);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    /// Tests the lazy open-to-half-open transition on observation after the
    /// cool-down elapses.
    #[tokio::test]
    async fn test_half_open_after_cooldown() {
        let clock = MockClock::new();
        let breaker = breaker_with_clock(1, 1, Duration::from_secs(30), clock.clone());

        let _ = breaker.execute(|| async { failing_op() }).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // Not elapsed yet: still open, still rejecting.
        clock.advance(Duration::from_secs(15));
        assert_eq!(breaker.state(), CircuitState::Open);
        let result = breaker.execute(|| async { Ok::<_, std::io::Error>(()) }).await;
        assert!(matches!(result, Err(FaultError::CircuitOpen)));

        // Elapsed: the next observation flips the state.
        clock.advance(Duration::from_secs(20));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    /// Tests a single successful trial closes the breaker and clears the
    /// failure counter when `success_threshold` is 1.
    #[tokio::test]
    async fn test_trial_success_closes() {
        let clock = MockClock::new();
        let breaker = breaker_with_clock(1, 1, Duration::from_secs(30), clock.clone());

        let _ = breaker.execute(|| async { failing_op() }).await;
        clock.advance(Duration::from_secs(31));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let result = breaker.execute(|| async { Ok::<_, std::io::Error>("recovered") }).await;
        assert_eq!(result.unwrap(), "recovered");

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
    }

    /// Tests the breaker needs `success_threshold` trial successes before
    /// closing.
    #[tokio::test]
    async fn test_success_threshold_above_one() {
        let clock = MockClock::new();
        let breaker = breaker_with_clock(1, 2, Duration::from_secs(30), clock.clone());

        let _ = breaker.execute(|| async { failing_op() }).await;
        clock.advance(Duration::from_secs(31));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let _ = breaker.execute(|| async { Ok::<_, std::io::Error>(()) }).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let _ = breaker.execute(|| async { Ok::<_, std::io::Error>(()) }).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    /// Tests a failing trial re-opens the breaker immediately.
    #[tokio::test]
    async fn test_trial_failure_reopens() {
        let clock = MockClock::new();
        let breaker = breaker_with_clock(1, 1, Duration::from_secs(30), clock.clone());

        let _ = breaker.execute(|| async { failing_op() }).await;
        clock.advance(Duration::from_secs(31));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let result = breaker.execute(|| async { failing_op() }).await;
        assert!(matches!(result, Err(FaultError::OperationFailed { .. })));
        assert_eq!(breaker.state(), CircuitState::Open);

        // The fresh failure stamp restarts the cool-down.
        let result = breaker.execute(|| async { Ok::<_, std::io::Error>(()) }).await;
        assert!(matches!(result, Err(FaultError::CircuitOpen)));

        clock.advance(Duration::from_secs(31));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    /// Tests exactly one of two concurrent half-open callers wins the trial
    /// slot; the loser is rejected immediately rather than queued.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_half_open_admits_single_trial() {
        let clock = MockClock::new();
        let breaker =
            Arc::new(breaker_with_clock(1, 1, Duration::from_secs(30), clock.clone()));

        let _ = breaker.execute(|| async { failing_op() }).await;
        clock.advance(Duration::from_secs(31));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // The trial occupies the slot long enough for the second caller to
        // contend with it.
        let trial_breaker = Arc::clone(&breaker);
        let trial = tokio::spawn(async move {
            trial_breaker
                .execute(|| async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok::<_, std::io::Error>("trial")
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let contender = breaker.execute(|| async { Ok::<_, std::io::Error>("contender") }).await;
        assert!(
            matches!(contender, Err(FaultError::CircuitOpen)),
            "second caller must be rejected while the trial slot is held"
        );

        let trial_result = trial.await.unwrap();
        assert_eq!(trial_result.unwrap(), "trial");
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    /// Tests `reset` unconditionally returns to closed with counters
    /// cleared.
    #[tokio::test]
    async fn test_reset() {
        let breaker = breaker_with_clock(1, 1, Duration::from_secs(30), MockClock::new());

        let _ = breaker.execute(|| async { failing_op() }).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.success_count, 0);

        let result = breaker.execute(|| async { Ok::<_, std::io::Error>(()) }).await;
        assert!(result.is_ok());
    }

    /// Tests the breaker is safe under concurrent successful calls.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_access() {
        let breaker = Arc::new(CircuitBreaker::with_defaults());
        let mut handles = vec![];

        for _ in 0..10 {
            let breaker = Arc::clone(&breaker);
            handles.push(tokio::spawn(async move {
                breaker.execute(|| async { Ok::<_, std::io::Error>(()) }).await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(breaker.snapshot().total_calls, 10);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
