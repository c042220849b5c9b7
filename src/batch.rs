//! Batch execution: N independent remote calls → one [`ResultAggregate`].
//!
//! ## Scheduling
//!
//! Items enter a bounded in-flight pool (`buffer_unordered`) of
//! `min(concurrency, rate_limit_per_minute)` slots. Every attempt of every
//! item, retries included, first takes a permit from one shared
//! [`RateLimiter`], so the batch as a whole stays under the remote quota.
//! Each item is driven by exactly one future and is therefore never in flight
//! twice.
//!
//! ## Ordering
//!
//! Outcomes complete in any order. Each is written to the slot of its input
//! position as soon as it arrives; the aggregate is built by a final pass over
//! the slots, so successes and failures come back in input order.
//!
//! ## Failure isolation
//!
//! A terminal failure of one item becomes an [`ItemFailure`] record. `run`
//! itself fails only when the configuration is invalid, and that is checked
//! before any item is attempted.

use crate::config::BatchConfig;
use crate::error::{BatchError, CallError};
use crate::output::{ItemFailure, ItemOutcome, ItemSuccess, ResultAggregate};
use crate::progress::ProgressCallback;
use crate::ratelimit::RateLimiter;
use crate::retry::{Gate, RetryPolicy, Sleeper, TokioSleeper};
use futures::stream::{self, StreamExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, info, warn, Instrument};

/// Run `call` over `items` under `config`.
///
/// Shorthand for `BatchExecutor::new(config.clone()).run(items, call)`.
///
/// # Example
/// ```rust,no_run
/// use edgequake_doc2x::{run, BatchConfig, CallError};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = BatchConfig::builder().rate_limit_per_minute(10).build()?;
/// let items = vec!["a.pdf", "b.pdf"];
/// let aggregate = run(&items, |name| {
///     let name = name.to_string();
///     async move { Ok::<_, CallError>(name.len()) }
/// }, &config).await?;
/// assert!(!aggregate.had_failure());
/// # Ok(())
/// # }
/// ```
pub async fn run<I, T, F, Fut>(
    items: &[I],
    call: F,
    config: &BatchConfig,
) -> Result<ResultAggregate<T>, BatchError>
where
    I: fmt::Display,
    F: Fn(&I) -> Fut,
    Fut: Future<Output = Result<T, CallError>>,
{
    BatchExecutor::new(config.clone()).run(items, call).await
}

/// Drives a retried, rate-limited remote call across a list of items.
#[derive(Clone)]
pub struct BatchExecutor {
    pub(crate) config: BatchConfig,
    pub(crate) sleeper: Arc<dyn Sleeper>,
    pub(crate) progress: Option<ProgressCallback>,
    pub(crate) cancel: CancellationToken,
}

impl fmt::Debug for BatchExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchExecutor")
            .field("config", &self.config)
            .field("progress", &self.progress.as_ref().map(|_| "<dyn BatchProgressCallback>"))
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl BatchExecutor {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            sleeper: Arc::new(TokioSleeper),
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the backoff sleeper (tests record waits instead of sleeping).
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Use `token` to cancel the batch from outside.
    ///
    /// Once cancelled, no new attempt is started. Attempts already running
    /// finish normally; items left unfinished are recorded as
    /// [`CallError::Cancelled`] failures.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Handle that cancels this executor's batches.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Run `call` over every item and aggregate the outcomes in input order.
    ///
    /// # Errors
    /// Only [`BatchError::InvalidConfig`], before any call is made. Item
    /// failures are recorded in the returned aggregate.
    pub async fn run<I, T, F, Fut>(
        &self,
        items: &[I],
        call: F,
    ) -> Result<ResultAggregate<T>, BatchError>
    where
        I: fmt::Display,
        F: Fn(&I) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        self.config.validate()?;

        let start = Instant::now();
        let total = items.len();
        info!(
            "Starting batch of {} items ({} attempts/min, {} in flight)",
            total,
            self.config.rate_limit_per_minute,
            self.config.in_flight_limit()
        );
        if let Some(ref cb) = self.progress {
            cb.on_batch_start(total);
        }

        let limiter = RateLimiter::per_minute(self.config.rate_limit_per_minute);
        let policy = self.policy();

        let mut slots: Vec<Option<ItemOutcome<T>>> = (0..total).map(|_| None).collect();
        let mut pending = stream::iter(
            items
                .iter()
                .enumerate()
                .map(|(index, item)| self.run_item(&policy, &limiter, index, total, item, &call)),
        )
        .buffer_unordered(self.config.in_flight_limit());

        while let Some(outcome) = pending.next().await {
            if let Some(slot) = slots.get_mut(outcome.index()) {
                *slot = Some(outcome);
            }
        }
        drop(pending);

        let aggregate = ResultAggregate::from_slots(slots);

        info!(
            "Batch complete: {}/{} items succeeded in {}ms",
            aggregate.successes().len(),
            total,
            start.elapsed().as_millis()
        );
        if let Some(ref cb) = self.progress {
            cb.on_batch_complete(total, aggregate.successes().len());
        }

        Ok(aggregate)
    }

    /// Blocking wrapper around [`run`](Self::run).
    ///
    /// Creates a temporary tokio runtime internally; do not call from inside
    /// an async context.
    pub fn run_sync<I, T, F, Fut>(
        &self,
        items: &[I],
        call: F,
    ) -> Result<ResultAggregate<T>, BatchError>
    where
        I: fmt::Display,
        F: Fn(&I) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        tokio::runtime::Runtime::new()
            .map_err(|e| BatchError::Internal(format!("Failed to create tokio runtime: {}", e)))?
            .block_on(self.run(items, call))
    }

    pub(crate) fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.retry.clone()).with_sleeper(Arc::clone(&self.sleeper))
    }

    /// Drive one item to a terminal outcome. Never fails.
    pub(crate) async fn run_item<I, T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        limiter: &RateLimiter,
        index: usize,
        total: usize,
        item: &I,
        call: &F,
    ) -> ItemOutcome<T>
    where
        I: fmt::Display,
        F: Fn(&I) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let id = item.to_string();
        let span = debug_span!("item", index, id = %id);

        async {
            if let Some(ref cb) = self.progress {
                cb.on_item_start(index, total);
            }
            let started = Instant::now();

            let observer = |attempt: u32, wait: Duration| {
                if let Some(ref cb) = self.progress {
                    cb.on_retry(index, attempt, wait);
                }
            };
            let gate = Gate {
                limiter: Some(limiter),
                cancel: Some(&self.cancel),
                adaptive: self.config.adaptive_throttle,
                observer: Some(&observer),
            };

            let attempted = policy.execute_gated(gate, || call(item)).await;

            match attempted.result {
                Ok(value) => {
                    debug!(
                        "Item {}/{} ({}) done after {} attempt(s) in {:?}",
                        index + 1,
                        total,
                        id,
                        attempted.attempts,
                        started.elapsed()
                    );
                    if let Some(ref cb) = self.progress {
                        cb.on_item_complete(index, total);
                    }
                    ItemOutcome::Success(ItemSuccess {
                        index,
                        id: id.clone(),
                        value,
                        attempts: attempted.attempts,
                    })
                }
                Err(error) => {
                    warn!(
                        "Item {}/{} ({}) failed after {} attempt(s): {}",
                        index + 1,
                        total,
                        id,
                        attempted.attempts,
                        error
                    );
                    if let Some(ref cb) = self.progress {
                        cb.on_item_error(index, total, &error.to_string());
                    }
                    ItemOutcome::Failure(ItemFailure {
                        index,
                        id: id.clone(),
                        error,
                        attempts: attempted.attempts,
                    })
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::tests::RecordingSleeper;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn executor(max_retries: u32) -> (BatchExecutor, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::default());
        let config = BatchConfig::builder()
            .max_retries(max_retries)
            .backoff_base(2.0)
            .rate_limit_per_minute(1000)
            .build()
            .unwrap();
        let exec = BatchExecutor::new(config).with_sleeper(sleeper.clone());
        (exec, sleeper)
    }

    #[tokio::test]
    async fn empty_batch_makes_no_calls() {
        let (exec, _) = executor(3);
        let calls = AtomicU32::new(0);
        let items: Vec<String> = Vec::new();
        let agg = exec
            .run(&items, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, CallError>(()) }
            })
            .await
            .unwrap();
        assert!(agg.successes().is_empty());
        assert!(agg.failures().is_empty());
        assert!(!agg.had_failure());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_config_fails_before_any_call() {
        let mut config = BatchConfig::default();
        config.retry.max_retries = 0;
        let exec = BatchExecutor::new(config);
        let calls = AtomicU32::new(0);
        let result = exec
            .run(&["a"], |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, CallError>(()) }
            })
            .await;
        assert!(matches!(result, Err(BatchError::InvalidConfig(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retry_progress_is_reported() {
        #[derive(Default)]
        struct Retries(Mutex<Vec<(usize, u32, Duration)>>);
        impl crate::progress::BatchProgressCallback for Retries {
            fn on_retry(&self, index: usize, attempt: u32, wait: Duration) {
                self.0.lock().unwrap().push((index, attempt, wait));
            }
        }

        let retries = Arc::new(Retries::default());
        let (exec, _) = executor(3);
        let exec = exec.with_progress(retries.clone());
        let attempts: Mutex<HashMap<String, u32>> = Mutex::new(HashMap::new());

        let agg = exec
            .run(&["ok", "flaky"], |item| {
                let n = {
                    let mut map = attempts.lock().unwrap();
                    let n = map.entry(item.to_string()).or_insert(0);
                    *n += 1;
                    *n
                };
                let flaky = *item == "flaky";
                async move {
                    if flaky && n == 1 {
                        Err(CallError::Network("reset".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert!(!agg.had_failure());
        assert_eq!(agg.successes()[1].attempts, 2);
        assert_eq!(
            *retries.0.lock().unwrap(),
            vec![(1, 1, Duration::from_secs(1))]
        );
    }

    #[tokio::test]
    async fn cancelled_batch_records_cancelled_failures() {
        let (exec, _) = executor(3);
        let token = exec.cancellation_token();
        token.cancel();
        let calls = AtomicU32::new(0);
        let agg = exec
            .run(&["a", "b"], |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, CallError>(()) }
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(agg.failures().len(), 2);
        assert!(agg
            .failures()
            .iter()
            .all(|f| f.error == CallError::Cancelled && f.attempts == 0));
    }

    #[test]
    fn run_sync_drives_its_own_runtime() {
        let (exec, _) = executor(1);
        let agg = exec
            .run_sync(&[1, 2, 3], |n| {
                let n = *n;
                async move { Ok::<_, CallError>(n * 10) }
            })
            .unwrap();
        let values: Vec<i32> = agg.successes().iter().map(|s| s.value).collect();
        assert_eq!(values, vec![10, 20, 30]);
    }
}
