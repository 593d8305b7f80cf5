//! Orchestrator composing retry, circuit breaking, and a deadline
//!
//! A [`FaultTolerance`] value is built once per protected resource and
//! reused by every call to it. It composes, outer to inner: an optional
//! wall-clock deadline over the whole call, an optional circuit breaker,
//! and an optional retry policy wrapped around the caller's raw operation.
//!
//! The nesting is deliberate: the breaker treats the *entire* retry
//! sequence as one unit, so a call that fails twice and then succeeds is
//! one breaker success, and a call that exhausts its retries is exactly one
//! breaker failure. Transient retried failures are invisible to the breaker
//! as long as the call eventually succeeds.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{instrument, warn};

use crate::circuit_breaker::{CircuitBreaker, Rejected};
use crate::clock::{Clock, SystemClock};
use crate::error::{ClassifyFailure, FaultError};
use crate::retry::RetryPolicy;

/// Composition of at most one retry policy, one circuit breaker, and one
/// operation deadline around caller-supplied operations.
///
/// Holds no per-call mutable state of its own; the breaker inside it does.
#[derive(Debug)]
pub struct FaultTolerance<C: Clock = SystemClock> {
    retry: Option<RetryPolicy>,
    breaker: Option<Arc<CircuitBreaker<C>>>,
    operation_timeout: Option<Duration>,
}

impl<C: Clock> Clone for FaultTolerance<C> {
    fn clone(&self) -> Self {
        Self {
            retry: self.retry.clone(),
            breaker: self.breaker.clone(),
            operation_timeout: self.operation_timeout,
        }
    }
}

impl FaultTolerance<SystemClock> {
    /// Create a builder with nothing configured.
    pub fn builder() -> FaultToleranceBuilder<SystemClock> {
        FaultToleranceBuilder::default()
    }

    /// The no-op composition: no retry, no breaker, no deadline.
    ///
    /// Executes the operation exactly once, inline, and passes any failure
    /// through unmodified.
    pub fn passthrough() -> Self {
        Self { retry: None, breaker: None, operation_timeout: None }
    }
}

impl<C: Clock> FaultTolerance<C> {
    /// The configured retry policy, if any.
    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    /// The shared circuit breaker, if any.
    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker<C>>> {
        self.breaker.as_ref()
    }

    /// The overall wall-clock bound, if any.
    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout
    }

    /// Whether nothing is configured.
    pub fn is_passthrough(&self) -> bool {
        self.retry.is_none() && self.breaker.is_none() && self.operation_timeout.is_none()
    }

    /// Execute `operation` under the configured protections.
    ///
    /// With no deadline the whole composition runs inline on the caller's
    /// task. With a deadline the composition is dispatched onto a fresh
    /// tokio task and the caller waits with a hard bound; on expiry the
    /// task is aborted and [`FaultError::OperationTimeout`] is returned
    /// immediately, without waiting for the task to stop.
    #[instrument(skip(self, operation))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, FaultError<E>>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send + 'static,
        E: ClassifyFailure + std::error::Error + Send + Sync + 'static,
    {
        let Some(limit) = self.operation_timeout else {
            return self.execute_composed(operation).await;
        };

        let engine = self.clone();
        let mut handle = tokio::spawn(async move { engine.execute_composed(operation).await });

        match tokio::time::timeout(limit, &mut handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_error)) => {
                if join_error.is_cancelled() {
                    Err(FaultError::Cancelled)
                } else {
                    // The operation panicked; surface it on the caller's
                    // thread of control rather than swallowing it.
                    std::panic::resume_unwind(join_error.into_panic())
                }
            }
            Err(_elapsed) => {
                handle.abort();
                warn!(timeout = ?limit, "operation deadline elapsed, aborting in-flight task");
                Err(FaultError::OperationTimeout { timeout: limit })
            }
        }
    }

    /// Run the breaker-around-retry composition without a deadline.
    async fn execute_composed<F, Fut, T, E>(&self, mut operation: F) -> Result<T, FaultError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyFailure + std::error::Error + Send + Sync + 'static,
    {
        match (&self.retry, &self.breaker) {
            (Some(retry), Some(breaker)) => {
                // The whole retry loop is one admission-and-execution unit:
                // the breaker sees one success or one failure per call, not
                // one per attempt.
                match breaker.execute_raw(|| retry.execute(operation)).await {
                    Ok(outcome) => outcome,
                    Err(Rejected) => Err(FaultError::CircuitOpen),
                }
            }
            (Some(retry), None) => retry.execute(operation).await,
            (None, Some(breaker)) => {
                match breaker.execute_raw(|| run_single(&mut operation)).await {
                    Ok(outcome) => outcome,
                    Err(Rejected) => Err(FaultError::CircuitOpen),
                }
            }
            (None, None) => run_single(&mut operation).await,
        }
    }
}

/// Run the raw operation once, translating only what the taxonomy demands.
async fn run_single<F, Fut, T, E>(operation: &mut F) -> Result<T, FaultError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: ClassifyFailure + std::error::Error + Send + Sync + 'static,
{
    match operation().await {
        Ok(value) => Ok(value),
        Err(error) if error.is_cancellation() => Err(FaultError::Cancelled),
        Err(error) => Err(FaultError::OperationFailed { source: error }),
    }
}

/// Builder for [`FaultTolerance`]; any subset of the three pieces may be
/// configured.
#[derive(Debug)]
pub struct FaultToleranceBuilder<C: Clock = SystemClock> {
    retry: Option<RetryPolicy>,
    breaker: Option<Arc<CircuitBreaker<C>>>,
    operation_timeout: Option<Duration>,
}

impl<C: Clock> Default for FaultToleranceBuilder<C> {
    fn default() -> Self {
        Self { retry: None, breaker: None, operation_timeout: None }
    }
}

impl<C: Clock> FaultToleranceBuilder<C> {
    /// Wrap the raw operation in a retry loop.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Guard the composed operation with a shared circuit breaker.
    ///
    /// Takes the breaker's clock type with it, so a `MockClock` breaker
    /// turns the whole composition deterministic in tests.
    pub fn circuit_breaker<C2: Clock>(
        self,
        breaker: Arc<CircuitBreaker<C2>>,
    ) -> FaultToleranceBuilder<C2> {
        FaultToleranceBuilder {
            retry: self.retry,
            breaker: Some(breaker),
            operation_timeout: self.operation_timeout,
        }
    }

    /// Bound the entire call, retries included, by a wall-clock deadline.
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Produce the immutable composition.
    pub fn build(self) -> FaultTolerance<C> {
        FaultTolerance {
            retry: self.retry,
            breaker: self.breaker,
            operation_timeout: self.operation_timeout,
        }
    }
}
