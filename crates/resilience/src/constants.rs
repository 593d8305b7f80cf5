// Default tuning values for the fault-tolerance core
use std::time::Duration;

/// Default total number of attempts, including the first
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default initial delay for exponential backoff
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Default multiplier applied between exponential backoff steps
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default cap on any single backoff delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

/// Default jitter factor (0.0 = no jitter, 1.0 = full jitter)
pub const DEFAULT_JITTER: f64 = 0.1;

/// Maximum exponent for exponential backoff calculation to prevent overflow
pub const MAX_BACKOFF_EXPONENT: u32 = 30;

/// Circuit breaker: default consecutive failures before opening
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Circuit breaker: default half-open successes before closing
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 1;

/// Circuit breaker: default cool-down before probing recovery
pub const DEFAULT_HALF_OPEN_AFTER: Duration = Duration::from_secs(30);

/// Minimum allowed max_attempts value
pub const MIN_MAX_ATTEMPTS: u32 = 1;

/// Maximum allowed max_attempts value
pub const MAX_MAX_ATTEMPTS: u32 = 100;
