//! Streaming batch API: emit item outcomes as they complete.
//!
//! Large batches under a tight quota take a long time (4 requests per minute
//! means 15 minutes for 60 files). A stream lets callers write each converted
//! file to disk, or report it, the moment it is ready instead of waiting for
//! the whole aggregate.
//!
//! Outcomes arrive in completion order. Collect them with
//! [`crate::output::ResultAggregate::from_outcomes`] to get input order back.

use crate::batch::BatchExecutor;
use crate::error::{BatchError, CallError};
use crate::output::ItemOutcome;
use crate::ratelimit::RateLimiter;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of item outcomes.
pub type OutcomeStream<T> = Pin<Box<dyn Stream<Item = ItemOutcome<T>> + Send>>;

impl BatchExecutor {
    /// Run `call` over `items`, yielding each outcome as soon as it is terminal.
    ///
    /// Same retry, rate-limit and concurrency rules as
    /// [`run`](BatchExecutor::run). Every item yields exactly one outcome.
    /// `on_batch_complete` is not fired; the end of the stream marks it.
    ///
    /// # Errors
    /// [`BatchError::InvalidConfig`] before the stream is created.
    ///
    /// # Example
    /// ```rust,no_run
    /// use edgequake_doc2x::{BatchConfig, BatchExecutor, CallError};
    /// use futures::StreamExt;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let executor = BatchExecutor::new(BatchConfig::default());
    /// let items = vec!["a.pdf".to_string(), "b.pdf".to_string()];
    /// let mut outcomes = executor.run_stream(items, |name: &String| {
    ///     let name = name.clone();
    ///     async move { Ok::<_, CallError>(name.len()) }
    /// })?;
    /// while let Some(outcome) = outcomes.next().await {
    ///     println!("{} finished after {} attempt(s)", outcome.id(), outcome.attempts());
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn run_stream<I, T, F, Fut>(
        &self,
        items: Vec<I>,
        call: F,
    ) -> Result<OutcomeStream<T>, BatchError>
    where
        I: fmt::Display + Send + Sync + 'static,
        T: Send + 'static,
        F: Fn(&I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, CallError>> + Send + 'static,
    {
        self.config.validate()?;

        let total = items.len();
        info!("Starting streaming batch of {} items", total);
        if let Some(ref cb) = self.progress {
            cb.on_batch_start(total);
        }

        let executor = Arc::new(self.clone());
        let limiter = Arc::new(RateLimiter::per_minute(self.config.rate_limit_per_minute));
        let policy = Arc::new(self.policy());
        let call = Arc::new(call);
        let in_flight = self.config.in_flight_limit();

        let s = stream::iter(items.into_iter().enumerate().map(move |(index, item)| {
            let executor = Arc::clone(&executor);
            let limiter = Arc::clone(&limiter);
            let policy = Arc::clone(&policy);
            let call = Arc::clone(&call);
            async move {
                executor
                    .run_item(&policy, &limiter, index, total, &item, &*call)
                    .await
            }
        }))
        .buffer_unordered(in_flight);

        Ok(Box::pin(s))
    }
}
