//! Result types returned by the invoker.

use crate::error::{BatchError, RequestError};
use serde::{Deserialize, Serialize};

/// The outcome of one request: a response or a terminal failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestResult<R> {
    /// Identifier copied from the originating [`crate::request::Request`].
    pub id: String,
    /// Position of the request in the submitted batch (0-based).
    pub index: usize,
    /// `Ok(response)` or the failure descriptor carrying the last error.
    pub outcome: Result<R, RequestError>,
    /// Attempts made, including the successful one. At least 1.
    pub attempts: u32,
    /// Wall-clock time spent on this request including backoff.
    pub duration_ms: u64,
}

impl<R> RequestResult<R> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn response(&self) -> Option<&R> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&RequestError> {
        self.outcome.as_ref().err()
    }

    /// Backoff waits this request went through.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Aggregate numbers for a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Requests that needed more than one attempt.
    pub retried_requests: usize,
    pub total_attempts: u64,
    pub total_duration_ms: u64,
}

impl BatchStats {
    pub fn from_results<R>(results: &[RequestResult<R>], total_duration_ms: u64) -> Self {
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            retried_requests: results.iter().filter(|r| r.attempts > 1).count(),
            total_attempts: results.iter().map(|r| r.attempts as u64).sum(),
            total_duration_ms,
        }
    }
}

/// Every result of a batch, in submission order, plus stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutput<R> {
    pub results: Vec<RequestResult<R>>,
    pub stats: BatchStats,
}

impl<R> BatchOutput<R> {
    /// Fail with [`BatchError::PartialFailure`] if any request failed.
    pub fn into_result(self) -> Result<Self, BatchError> {
        if self.stats.failed > 0 {
            return Err(BatchError::PartialFailure {
                succeeded: self.stats.succeeded,
                failed: self.stats.failed,
                total: self.stats.total,
            });
        }
        Ok(self)
    }

    /// Responses in submission order, `None` where the request failed.
    pub fn responses(&self) -> impl Iterator<Item = Option<&R>> {
        self.results.iter().map(|r| r.response())
    }
}
