//! Streaming invocation API: emit results as requests complete.
//!
//! Unlike [`crate::invoker::BatchInvoker::invoke_all`], which returns only
//! after the whole batch finishes, [`invoke_stream`] yields each
//! [`RequestResult`] as soon as its request succeeds or exhausts its attempts.
//! Results arrive in completion order; use `result.index` (or sort by it) if
//! submission order matters.

use crate::config::BatchConfig;
use crate::error::InvokeError;
use crate::invoker::run_request;
use crate::output::RequestResult;
use crate::request::Request;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of request results.
pub type ResultStream<R> = Pin<Box<dyn Stream<Item = RequestResult<R>> + Send>>;

/// Invoke `send` for every request, yielding results in completion order.
///
/// Same pool bound and retry semantics as the eager API. The progress
/// callback receives every per-request event; `on_batch_start` fires
/// immediately and `on_batch_complete` is not emitted, since the stream's
/// end is observed by the consumer.
pub fn invoke_stream<T, R, F, Fut>(
    requests: Vec<Request<T>>,
    send: F,
    config: &BatchConfig,
) -> ResultStream<R>
where
    T: Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(&Request<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, InvokeError>> + Send + 'static,
{
    info!(
        "Starting streaming batch: {} requests, {} workers",
        requests.len(),
        config.max_workers
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(requests.len());
    }

    let send = Arc::new(send);
    let policy = config.retry.clone();
    let cb = config.progress_callback.clone();

    let s = stream::iter(requests.into_iter().enumerate().map(move |(index, request)| {
        let send = Arc::clone(&send);
        let policy = policy.clone();
        let cb = cb.clone();
        async move { run_request(index, &request, send.as_ref(), &policy, cb.as_deref()).await }
    }))
    .buffer_unordered(config.max_workers.max(1));

    Box::pin(s)
}
