//! Error types and failure classification for the fault-tolerance core
//!
//! Callers of [`FaultTolerance`](crate::FaultTolerance) receive exactly one
//! of the [`FaultError`] outcomes (or a success value). Internal wrapping
//! used to cross the task boundary never surfaces.

use std::time::Duration;

use thiserror::Error;

/// Broad categories a protected operation's failure can fall into.
///
/// Categories drive the retry allow-list: a policy built with
/// `retry_on([FailureKind::Timeout, FailureKind::Network])` retries only
/// failures classified into one of those kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The downstream operation took too long.
    Timeout,
    /// Connection-level trouble: refused, reset, interrupted transfer.
    Network,
    /// The downstream resource asked us to slow down.
    RateLimited,
    /// The downstream resource reported an internal fault.
    Server,
    /// The caller's thread of control was asked to stop.
    Cancelled,
    /// Anything that does not fit a more specific category.
    Other,
}

/// Classification hook implemented by protected-operation error types.
///
/// The retry loop uses [`is_cancellation`](ClassifyFailure::is_cancellation)
/// to propagate cancellation immediately instead of retrying it, and
/// [`failure_kind`](ClassifyFailure::failure_kind) to match the allow-list
/// configured on a [`RetryPolicy`](crate::RetryPolicy).
pub trait ClassifyFailure {
    /// The category this failure falls into. Defaults to
    /// [`FailureKind::Other`].
    fn failure_kind(&self) -> FailureKind {
        FailureKind::Other
    }

    /// Whether this failure represents cancellation of the caller's thread
    /// of control. Cancellation is never retried and never translated.
    fn is_cancellation(&self) -> bool {
        self.failure_kind() == FailureKind::Cancelled
    }
}

impl ClassifyFailure for std::io::Error {
    fn failure_kind(&self) -> FailureKind {
        use std::io::ErrorKind;

        match self.kind() {
            ErrorKind::TimedOut => FailureKind::Timeout,
            ErrorKind::Interrupted => FailureKind::Cancelled,
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => FailureKind::Network,
            _ => FailureKind::Other,
        }
    }
}

/// Outcomes of a protected call that did not produce a value.
///
/// Generic over the protected operation's own error type `E`, which is
/// preserved as the `#[source]` of [`RetryExhausted`](Self::RetryExhausted)
/// and [`OperationFailed`](Self::OperationFailed).
#[derive(Debug, Error)]
pub enum FaultError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Call rejected without execution: the breaker is open or the
    /// half-open trial slot was taken.
    #[error("circuit breaker is open, rejecting call")]
    CircuitOpen,

    /// The composed call, retries included, exceeded its deadline.
    #[error("operation timed out after {timeout:?}")]
    OperationTimeout {
        /// The configured deadline that elapsed.
        timeout: Duration,
    },

    /// Every allowed attempt failed; `last_cause` is the final failure.
    #[error("all retry attempts exhausted after {attempts} attempts")]
    RetryExhausted {
        /// Number of attempts actually made.
        attempts: u32,
        /// The failure observed on the final attempt.
        #[source]
        last_cause: E,
    },

    /// The caller's thread of control was asked to stop.
    #[error("operation was cancelled")]
    Cancelled,

    /// Unclassified pass-through: the operation failed and no resilience
    /// mechanism had anything to add.
    #[error("operation failed")]
    OperationFailed {
        /// The underlying failure.
        #[source]
        source: E,
    },
}

impl<E> FaultError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Whether this outcome is a fail-fast breaker rejection.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen)
    }

    /// Consume the outcome and return the underlying operation error, if one
    /// was observed.
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::RetryExhausted { last_cause, .. } => Some(last_cause),
            Self::OperationFailed { source } => Some(source),
            Self::CircuitOpen | Self::OperationTimeout { .. } | Self::Cancelled => None,
        }
    }
}

/// Result type for protected calls.
pub type FaultResult<T, E> = Result<T, FaultError<E>>;

/// Configuration validation failure from one of the builders.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The supplied configuration violates an invariant.
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// Human-readable description of the violated invariant.
        message: String,
    },
}

/// Result type for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigError>;
