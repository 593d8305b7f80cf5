//! Fault-tolerance core for calls to unreliable external operations.
//!
//! Protects network calls, model inference, and database access by
//! composing three resilience mechanisms into a single reusable execution
//! wrapper:
//!
//! - **[`Backoff`]**: pure attempt-number → wait-duration strategy with
//!   optional jitter
//! - **[`RetryPolicy`]**: drives repeated invocation using a backoff and a
//!   retry condition
//! - **[`CircuitBreaker`]**: shared state machine that fails fast when a
//!   protected resource is unhealthy
//! - **[`FaultTolerance`]**: composes retry, breaker, and an overall
//!   deadline around a caller-supplied operation
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use keel_resilience::{Backoff, CircuitBreaker, FaultTolerance, RetryPolicy};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let retry = RetryPolicy::builder()
//!     .max_attempts(3)
//!     .backoff(Backoff::exponential(
//!         Duration::from_millis(500),
//!         2.0,
//!         Duration::from_secs(300),
//!     ))
//!     .build()?;
//!
//! let breaker = Arc::new(CircuitBreaker::with_defaults());
//!
//! // One engine per protected resource, built once and reused.
//! let engine = FaultTolerance::builder()
//!     .retry_policy(retry)
//!     .circuit_breaker(breaker)
//!     .operation_timeout(Duration::from_secs(30))
//!     .build();
//!
//! let value = engine
//!     .execute(|| async { fetch_remote().await })
//!     .await?;
//! # Ok(())
//! # }
//! # async fn fetch_remote() -> Result<String, std::io::Error> { Ok(String::new()) }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod constants;
pub mod error;
pub mod fault_tolerance;
pub mod retry;

// Re-export the public surface at the crate root for convenience
pub use backoff::Backoff;
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerSnapshot,
    CircuitState,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use error::{
    ClassifyFailure, ConfigError, ConfigResult, FailureKind, FaultError, FaultResult,
};
pub use fault_tolerance::{FaultTolerance, FaultToleranceBuilder};
pub use retry::{RetryCondition, RetryPolicy, RetryPolicyBuilder};
