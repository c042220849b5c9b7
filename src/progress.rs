//! Progress-callback trait for per-item batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::batch::BatchExecutor::with_progress`] to receive events as the
//! executor works through the items. Callbacks are observability only and
//! never influence control flow.
//!
//! # Example
//!
//! ```rust
//! use edgequake_doc2x::{BatchConfig, BatchExecutor, BatchProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_item_complete(&self, index: usize, total: usize) {
//!         let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("item {} done ({}/{})", index + 1, done, total);
//!     }
//! }
//!
//! let executor = BatchExecutor::new(BatchConfig::default())
//!     .with_progress(Arc::new(CountingCallback { completed: AtomicUsize::new(0) }));
//! ```

use std::sync::Arc;
use std::time::Duration;

/// Called by the batch executor as it processes each item.
///
/// Items run concurrently, so every method may be called from several tasks
/// at once; implementations must synchronise their own state. All methods
/// default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before any item is attempted.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called when an item enters the in-flight pool.
    ///
    /// * `index` — 0-indexed input position
    fn on_item_start(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// Called before each backoff sleep.
    ///
    /// * `attempt` — 1-indexed number of the attempt that just failed
    /// * `wait`    — backoff about to be slept
    fn on_retry(&self, index: usize, attempt: u32, wait: Duration) {
        let _ = (index, attempt, wait);
    }

    /// Called when an item succeeds.
    fn on_item_complete(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// Called when an item fails terminally.
    ///
    /// * `error` — human-readable error description
    fn on_item_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called once after every item is terminal.
    fn on_batch_complete(&self, total: usize, success_count: usize) {
        let _ = (total, success_count);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias for the shared callback handle.
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
        fn on_item_start(&self, _index: usize, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_retry(&self, _index: usize, _attempt: u32, _wait: Duration) {
            self.retries.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_complete(&self, _index: usize, _total: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_error(&self, _index: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(5);
        cb.on_item_start(0, 5);
        cb.on_retry(0, 1, Duration::from_secs(1));
        cb.on_item_complete(0, 5);
        cb.on_item_error(1, 5, "rate limit exceeded");
        cb.on_batch_complete(5, 4);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_item_start(0, 2);
        tracker.on_retry(0, 1, Duration::from_secs(1));
        tracker.on_item_complete(0, 2);
        tracker.on_item_start(1, 2);
        tracker.on_item_error(1, 2, "boom");

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.retries.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
    }
}
