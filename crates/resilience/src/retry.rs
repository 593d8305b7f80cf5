//! Retry policy: repeated invocation with backoff between attempts
//!
//! A [`RetryPolicy`] is an immutable value built once and reused across many
//! invocations. It drives an operation through up to `max_attempts`
//! strictly sequential attempts, sleeping between them according to its
//! [`Backoff`] and propagating cancellation immediately.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::backoff::Backoff;
use crate::constants::{DEFAULT_JITTER, DEFAULT_MAX_ATTEMPTS, MAX_MAX_ATTEMPTS, MIN_MAX_ATTEMPTS};
use crate::error::{ClassifyFailure, ConfigError, ConfigResult, FailureKind, FaultError};

/// Type alias for the custom retry predicate to reduce complexity
type FailurePredicate = Arc<dyn Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync>;

/// Gate deciding whether a failed attempt may be retried.
pub enum RetryCondition {
    /// Retry any failure (the default).
    Always,
    /// Retry only failures whose classified kind is in the allow-list.
    Kinds(Vec<FailureKind>),
    /// Retry only failures accepted by a caller-supplied predicate.
    Custom(FailurePredicate),
}

impl RetryCondition {
    fn allows<E>(&self, error: &E) -> bool
    where
        E: ClassifyFailure + std::error::Error + Send + Sync + 'static,
    {
        match self {
            Self::Always => true,
            Self::Kinds(kinds) => kinds.contains(&error.failure_kind()),
            Self::Custom(predicate) => predicate(error as &(dyn std::error::Error + 'static)),
        }
    }
}

impl Clone for RetryCondition {
    fn clone(&self) -> Self {
        match self {
            Self::Always => Self::Always,
            Self::Kinds(kinds) => Self::Kinds(kinds.clone()),
            Self::Custom(predicate) => Self::Custom(Arc::clone(predicate)),
        }
    }
}

impl std::fmt::Debug for RetryCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Always => write!(f, "Always"),
            Self::Kinds(kinds) => f.debug_tuple("Kinds").field(kinds).finish(),
            Self::Custom(_) => write!(f, "Custom(<predicate>)"),
        }
    }
}

impl Default for RetryCondition {
    fn default() -> Self {
        Self::Always
    }
}

/// Immutable retry configuration plus the loop that applies it.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
    jitter: f64,
    retry_on: RetryCondition,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::default(),
            jitter: DEFAULT_JITTER,
            retry_on: RetryCondition::default(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy builder with default settings.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Total number of attempts, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The configured delay curve.
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// The configured jitter factor.
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Drive `operation` through up to `max_attempts` sequential attempts.
    ///
    /// Returns the first success immediately. A failure classified as
    /// cancellation aborts the loop at once with [`FaultError::Cancelled`].
    /// Any other failure on the final attempt, or one the retry condition
    /// rejects, ends the loop with [`FaultError::RetryExhausted`] carrying
    /// the attempt count and the last failure.
    #[instrument(skip(self, operation), fields(max_attempts = self.max_attempts))]
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, FaultError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyFailure + std::error::Error + Send + Sync + 'static,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) if error.is_cancellation() => {
                    debug!(attempt, "operation cancelled, aborting retry loop");
                    return Err(FaultError::Cancelled);
                }
                Err(error) => {
                    if attempt >= self.max_attempts || !self.retry_on.allows(&error) {
                        warn!(
                            attempt,
                            max_attempts = self.max_attempts,
                            error = %error,
                            "giving up on operation"
                        );
                        return Err(FaultError::RetryExhausted {
                            attempts: attempt,
                            last_cause: error,
                        });
                    }

                    let delay = self.backoff.delay(attempt, self.jitter);
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay = ?delay,
                        error = %error,
                        "attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Builder for [`RetryPolicy`] with validation at `build()`.
#[derive(Default)]
pub struct RetryPolicyBuilder {
    max_attempts: Option<u32>,
    backoff: Option<Backoff>,
    jitter: Option<f64>,
    kinds: Option<Vec<FailureKind>>,
    predicate: Option<FailurePredicate>,
}

impl std::fmt::Debug for RetryPolicyBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicyBuilder")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("kinds", &self.kinds)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

impl RetryPolicyBuilder {
    /// Create a builder with every option unset (defaults apply at build).
    pub fn new() -> Self {
        Self::default()
    }

    /// Total attempts including the first; must be at least 1.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Delay curve between attempts.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Jitter factor; clamped to `[0.0, 1.0]`.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = Some(jitter.clamp(0.0, 1.0));
        self
    }

    /// Retry only failures classified into one of the given kinds.
    pub fn retry_on<I>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = FailureKind>,
    {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Retry only failures the predicate accepts. Takes precedence over
    /// [`retry_on`](Self::retry_on) when both are supplied.
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Validate and produce the immutable policy.
    pub fn build(self) -> ConfigResult<RetryPolicy> {
        let max_attempts = self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if !(MIN_MAX_ATTEMPTS..=MAX_MAX_ATTEMPTS).contains(&max_attempts) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "max_attempts must be between {MIN_MAX_ATTEMPTS} and {MAX_MAX_ATTEMPTS}, \
                     got {max_attempts}"
                ),
            });
        }

        let backoff = self.backoff.unwrap_or_default();
        backoff.validate()?;

        let retry_on = match (self.predicate, self.kinds) {
            (Some(predicate), _) => RetryCondition::Custom(predicate),
            (None, Some(kinds)) => RetryCondition::Kinds(kinds),
            (None, None) => RetryCondition::Always,
        };

        Ok(RetryPolicy {
            max_attempts,
            backoff,
            jitter: self.jitter.unwrap_or(DEFAULT_JITTER),
            retry_on,
        })
    }
}
