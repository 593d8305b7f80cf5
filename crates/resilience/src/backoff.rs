//! Backoff delay strategies for the retry loop
//!
//! A [`Backoff`] maps a 1-based attempt number to the wait duration before
//! the next attempt. It is a pure value: no state, no side effects, safe to
//! share and call concurrently.

use std::time::Duration;

use rand::Rng;

use crate::constants::{
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY, MAX_BACKOFF_EXPONENT,
};
use crate::error::{ConfigError, ConfigResult};

/// Delay curve between retry attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// The same delay before every retry.
    Fixed {
        /// Constant delay returned for every attempt.
        delay: Duration,
    },
    /// `initial_delay * multiplier^(attempt-1)`, capped at `max_delay`.
    Exponential {
        /// Delay before the first retry.
        initial_delay: Duration,
        /// Growth factor between steps; must be at least 1.0.
        multiplier: f64,
        /// Upper bound on any single delay.
        max_delay: Duration,
    },
}

impl Backoff {
    /// Constant delay between attempts.
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed { delay }
    }

    /// Exponentially growing delay, capped at `max_delay`.
    pub fn exponential(initial_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self::Exponential { initial_delay, multiplier, max_delay }
    }

    /// Validate the strategy's invariants.
    pub fn validate(&self) -> ConfigResult<()> {
        if let Self::Exponential { multiplier, .. } = self {
            if *multiplier < 1.0 {
                return Err(ConfigError::Invalid {
                    message: format!("backoff multiplier must be at least 1.0, got {multiplier}"),
                });
            }
        }
        Ok(())
    }

    /// Compute the wait before the retry that follows `attempt`.
    ///
    /// `attempt` is 1-based. With `jitter <= 0` the result is deterministic;
    /// otherwise a uniformly random offset in `[-max_jitter, +max_jitter]`
    /// (where `max_jitter = delay_millis * jitter`, jitter clamped to
    /// `[0, 1]`) is added and the result floored at zero.
    pub fn delay(&self, attempt: u32, jitter: f64) -> Duration {
        apply_jitter(self.base_delay(attempt), jitter)
    }

    /// The un-jittered delay for a given attempt.
    fn base_delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential { initial_delay, multiplier, max_delay } => {
                // Cap the exponent so the f64 power cannot blow up for
                // pathological attempt counts.
                let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
                let scaled = initial_delay.as_millis() as f64 * multiplier.powi(exponent as i32);
                let capped = scaled.min(max_delay.as_millis() as f64);
                Duration::from_millis(capped as u64)
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            initial_delay: DEFAULT_INITIAL_DELAY,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

/// Add a uniform random offset to prevent synchronized retry storms.
fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }

    let jitter = jitter.min(1.0);
    let delay_millis = delay.as_millis() as i64;
    let max_jitter = (delay_millis as f64 * jitter) as i64;
    if max_jitter == 0 {
        return delay;
    }

    let offset = rand::thread_rng().gen_range(-max_jitter..=max_jitter);
    Duration::from_millis(delay_millis.saturating_add(offset).max(0) as u64)
}
