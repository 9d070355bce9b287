//! Retry policy and the per-request attempt state machine.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from vendor APIs are transient and frequent under
//! concurrent load. Each request gets `max_attempts` tries in total. Between
//! tries the request waits `backoff`, or with [`Backoff::Exponential`]
//! `backoff * factor^(retry - 1)`: with a 1 s base and factor 2 the wait
//! sequence is 1 s → 2 s → 4 s. Every wait is capped at `max_backoff`.
//!
//! ## State machine
//!
//! ```text
//! Pending ──▶ Attempting(n) ──ok──▶ Succeeded
//!                 │
//!                 err, n < max ──▶ FailedRetryable(n) ──sleep──▶ Attempting(n+1)
//!                 │
//!                 err, n = max ──▶ FailedTerminal(n)
//! ```

use crate::error::InvokeError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the wait between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Backoff {
    /// The same delay before every retry. (default)
    #[default]
    Fixed,
    /// Delay multiplied by `factor` after each retry.
    Exponential { factor: f64 },
}

/// Per-request retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first. Always ≥ 1. Default: 3.
    pub max_attempts: u32,

    /// Base delay between attempts. Default: 1 s.
    pub backoff: Duration,

    /// Fixed or exponential growth. Default: fixed.
    pub strategy: Backoff,

    /// Upper bound for any single wait. Default: 60 s.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
            strategy: Backoff::Fixed,
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// A fixed-delay policy.
    pub fn fixed(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            ..Self::default()
        }
    }

    /// A doubling-delay policy.
    pub fn exponential(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            strategy: Backoff::Exponential { factor: 2.0 },
            ..Self::default()
        }
    }

    /// Delay to wait after the `attempt`-th failed attempt (1-based).
    ///
    /// Never exceeds `max_backoff`; a growth that overflows `Duration` is
    /// clamped to the cap.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let delay = match self.strategy {
            Backoff::Fixed => self.backoff,
            Backoff::Exponential { factor } => {
                let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let secs = self.backoff.as_secs_f64() * factor.max(1.0).powi(exp);
                Duration::try_from_secs_f64(secs).unwrap_or(self.max_backoff)
            }
        };
        delay.min(self.max_backoff)
    }
}

/// Where a single request stands in its retry cycle.
#[derive(Debug)]
pub enum AttemptState<R> {
    /// Not yet sent.
    Pending,
    /// Attempt `n` (1-based) is about to be sent.
    Attempting(u32),
    /// Attempt `n` returned a response.
    Succeeded { attempt: u32, response: R },
    /// Attempt `n` failed and the budget allows another.
    FailedRetryable { attempt: u32, error: InvokeError },
    /// Attempt `n` failed and it was the last one allowed.
    FailedTerminal { attempt: u32, error: InvokeError },
}

impl<R> AttemptState<R> {
    /// Transition out of `Attempting(attempt)` given the outcome of `send`.
    pub fn after_attempt(attempt: u32, outcome: Result<R, InvokeError>, policy: &RetryPolicy) -> Self {
        match outcome {
            Ok(response) => AttemptState::Succeeded { attempt, response },
            Err(error) if attempt < policy.max_attempts => {
                AttemptState::FailedRetryable { attempt, error }
            }
            Err(error) => AttemptState::FailedTerminal { attempt, error },
        }
    }

    /// True for `Succeeded` and `FailedTerminal`.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            AttemptState::Succeeded { .. } | AttemptState::FailedTerminal { .. }
        )
    }
}
