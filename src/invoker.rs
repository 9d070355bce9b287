//! Bounded-concurrency, retrying batch invocation.
//!
//! ## Why an index-preserving buffer?
//!
//! Requests finish in whatever order the remote endpoint answers them, but
//! callers (e.g. the OCR pipeline writing `page_1.txt`, `page_2.txt`, …)
//! need results in submission order. Completed results are placed into a
//! slot reserved for their original index; each slot is written exactly
//! once, so no lock is involved.
//!
//! ## Concurrency
//!
//! `buffer_unordered(max_workers)` keeps at most `max_workers` request
//! futures alive at a time. A request keeps its slot while it waits for the
//! remote call and while it sleeps between attempts; the next queued request
//! starts only when a slot frees up.

use crate::config::BatchConfig;
use crate::error::{InvokeError, RequestError};
use crate::output::{BatchOutput, BatchStats, RequestResult};
use crate::progress::BatchProgressCallback;
use crate::request::Request;
use crate::retry::{AttemptState, RetryPolicy};
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Dispatches a batch of requests across a bounded worker pool.
#[derive(Debug, Clone, Default)]
pub struct BatchInvoker {
    config: BatchConfig,
}

impl BatchInvoker {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Send every request through `send` and collect one result per request.
    ///
    /// Never fails as a whole: a request whose attempts are all exhausted
    /// yields a [`RequestError`] in its slot and the rest of the batch
    /// carries on. `results[i]` always belongs to `requests[i]`.
    pub async fn invoke_all<T, R, F, Fut>(&self, requests: Vec<Request<T>>, send: F) -> BatchOutput<R>
    where
        F: Fn(&Request<T>) -> Fut,
        Fut: Future<Output = Result<R, InvokeError>>,
    {
        let start = Instant::now();
        let total = requests.len();
        let policy = &self.config.retry;
        let cb = self.config.progress_callback.as_deref();
        let send = &send;

        info!(
            "Starting batch: {} requests, {} workers, {} attempts each",
            total, self.config.max_workers, policy.max_attempts
        );
        if let Some(cb) = cb {
            cb.on_batch_start(total);
        }

        let mut slots: Vec<Option<RequestResult<R>>> = (0..total).map(|_| None).collect();

        let mut in_flight = stream::iter(requests.iter().enumerate().map(|(index, request)| {
            run_request(index, request, send, policy, cb)
        }))
        .buffer_unordered(self.config.max_workers.max(1));

        while let Some(result) = in_flight.next().await {
            let index = result.index;
            slots[index] = Some(result);
        }

        let results: Vec<RequestResult<R>> = slots.into_iter().flatten().collect();
        debug_assert_eq!(results.len(), total);

        let stats = BatchStats::from_results(&results, start.elapsed().as_millis() as u64);
        info!(
            "Batch complete: {}/{} succeeded, {} retried, {}ms",
            stats.succeeded, stats.total, stats.retried_requests, stats.total_duration_ms
        );
        if let Some(cb) = cb {
            cb.on_batch_complete(stats.total, stats.succeeded);
        }

        BatchOutput { results, stats }
    }
}

/// Invoke `send` for every request with at most `max_workers` in flight.
///
/// Shorthand for [`BatchInvoker::invoke_all`] without a progress callback;
/// returns the ordered results only.
///
/// # Example
/// ```rust
/// use ocrbatch::{invoke_all, numbered, InvokeError, RetryPolicy};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let requests = numbered(vec![1, 2, 3]);
/// let results = invoke_all(
///     requests,
///     |r| {
///         let n = r.payload;
///         async move { Ok::<_, InvokeError>(n * 10) }
///     },
///     RetryPolicy::fixed(3, Duration::from_millis(10)),
///     2,
/// )
/// .await;
/// let values: Vec<i32> = results.iter().filter_map(|r| r.response().copied()).collect();
/// assert_eq!(values, vec![10, 20, 30]);
/// # });
/// ```
pub async fn invoke_all<T, R, F, Fut>(
    requests: Vec<Request<T>>,
    send: F,
    policy: RetryPolicy,
    max_workers: usize,
) -> Vec<RequestResult<R>>
where
    F: Fn(&Request<T>) -> Fut,
    Fut: Future<Output = Result<R, InvokeError>>,
{
    let config = BatchConfig {
        max_workers: max_workers.max(1),
        retry: policy,
        progress_callback: None,
    };
    BatchInvoker::new(config).invoke_all(requests, send).await.results
}

/// Drive one request through the attempt state machine to a final result.
pub(crate) async fn run_request<T, R, F, Fut>(
    index: usize,
    request: &Request<T>,
    send: &F,
    policy: &RetryPolicy,
    cb: Option<&dyn BatchProgressCallback>,
) -> RequestResult<R>
where
    F: Fn(&Request<T>) -> Fut,
    Fut: Future<Output = Result<R, InvokeError>>,
{
    let start = Instant::now();
    let id = request.id.as_str();
    if let Some(cb) = cb {
        cb.on_request_start(index, id);
    }

    let mut state = AttemptState::Pending;
    let (attempts, outcome) = loop {
        state = match state {
            AttemptState::Pending => AttemptState::Attempting(1),
            AttemptState::Attempting(attempt) => {
                AttemptState::after_attempt(attempt, send(request).await, policy)
            }
            AttemptState::FailedRetryable { attempt, error } => {
                let delay = policy.delay_after(attempt);
                warn!(
                    "Request {}: attempt {}/{} failed — {}; retrying in {:?}",
                    id, attempt, policy.max_attempts, error, delay
                );
                if let Some(cb) = cb {
                    cb.on_retry(index, id, attempt, delay);
                }
                sleep(delay).await;
                AttemptState::Attempting(attempt + 1)
            }
            AttemptState::Succeeded { attempt, response } => break (attempt, Ok(response)),
            AttemptState::FailedTerminal { attempt, error } => {
                warn!(
                    "Request {}: giving up after {} attempts — {}",
                    id, attempt, error
                );
                break (
                    attempt,
                    Err(RequestError::Exhausted {
                        id: id.to_string(),
                        attempts: attempt,
                        detail: error.to_string(),
                    }),
                );
            }
        };
    };

    let duration = start.elapsed();
    if let Some(cb) = cb {
        match &outcome {
            Ok(_) => cb.on_request_complete(index, id),
            Err(e) => cb.on_request_error(index, id, &e.to_string()),
        }
    }
    debug!("Request {}: {} attempt(s), {:?}", id, attempts, duration);

    RequestResult {
        id: id.to_string(),
        index,
        outcome,
        attempts,
        duration_ms: duration.as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn empty_batch_yields_empty_output() {
        let out = BatchInvoker::default()
            .invoke_all(Vec::<Request<()>>::new(), |_| async {
                Ok::<(), InvokeError>(())
            })
            .await;
        assert!(out.results.is_empty());
        assert_eq!(out.stats.total, 0);
    }

    #[tokio::test]
    async fn run_request_counts_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(4, Duration::ZERO);
        let request = Request::new("x", ());
        let send = |_: &Request<()>| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(InvokeError::Network("reset".into()))
                } else {
                    Ok("done")
                }
            }
        };

        let result = run_request(0, &request, &send, &policy, None).await;
        assert_eq!(result.attempts, 3);
        assert_eq!(result.response(), Some(&"done"));
    }

    #[tokio::test]
    async fn exhausted_request_keeps_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(2, Duration::ZERO);
        let request = Request::new("bad", ());
        let send = |_: &Request<()>| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Err::<(), _>(InvokeError::Api { status: 500, message: format!("call {n}") }) }
        };

        let result = run_request(0, &request, &send, &policy, None).await;
        match result.outcome {
            Err(RequestError::Exhausted { attempts, ref detail, .. }) => {
                assert_eq!(attempts, 2);
                assert!(detail.contains("call 1"), "got: {detail}");
            }
            Ok(_) => panic!("expected failure"),
        }
    }
}
