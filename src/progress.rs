//! Progress-callback trait for per-request batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::BatchConfigBuilder::progress_callback`] to receive
//! real-time events as the invoker processes each request.
//!
//! The trait is `Send + Sync`: with `max_workers > 1` the request-level
//! methods are called concurrently, so implementations must protect shared
//! mutable state (e.g. `Mutex`, `AtomicUsize`).
//!
//! # Example
//!
//! ```rust
//! use ocrbatch::{BatchConfig, BatchProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_request_complete(&self, index: usize, id: &str) {
//!         let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("request {id} (#{index}) done, {done} so far");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = BatchConfig::builder()
//!     .progress_callback(counter as Arc<dyn BatchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;
use std::time::Duration;

/// Called by the invoker as it processes each request.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `index` is the 0-based position in the batch.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before any request is sent.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called when a worker slot picks up a request.
    fn on_request_start(&self, index: usize, id: &str) {
        let _ = (index, id);
    }

    /// Called after attempt `attempt` failed, before sleeping `delay`.
    fn on_retry(&self, index: usize, id: &str, attempt: u32, delay: Duration) {
        let _ = (index, id, attempt, delay);
    }

    /// Called when a request succeeds.
    fn on_request_complete(&self, index: usize, id: &str) {
        let _ = (index, id);
    }

    /// Called when a request fails after all attempts.
    fn on_request_error(&self, index: usize, id: &str, error: &str) {
        let _ = (index, id, error);
    }

    /// Called once after every request has a result.
    fn on_batch_complete(&self, total: usize, succeeded: usize) {
        let _ = (total, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::BatchConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        retries: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
    }

    impl BatchProgressCallback for TrackingCallback {
        fn on_request_start(&self, _index: usize, _id: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_retry(&self, _index: usize, _id: &str, _attempt: u32, _delay: Duration) {
            self.retries.fetch_add(1, Ordering::SeqCst);
        }

        fn on_request_complete(&self, _index: usize, _id: &str) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_request_error(&self, _index: usize, _id: &str, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(5);
        cb.on_request_start(0, "a");
        cb.on_retry(0, "a", 1, Duration::from_millis(10));
        cb.on_request_complete(0, "a");
        cb.on_request_error(1, "b", "some error");
        cb.on_batch_complete(5, 4);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_request_start(0, "a");
        tracker.on_request_complete(0, "a");
        tracker.on_request_start(1, "b");
        tracker.on_retry(1, "b", 1, Duration::ZERO);
        tracker.on_request_error(1, "b", "timeout");

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.retries.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
    }
}
