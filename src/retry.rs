//! Bounded retry with exponential backoff around any fallible remote call.
//!
//! The wrapped operation knows nothing about retries: it is handed to
//! [`RetryPolicy::execute`] as a closure producing a fresh future per attempt.
//!
//! ## Schedule
//!
//! With `max_retries = N` the call is attempted at most N times. After failed
//! attempt `k` (from 0) the task sleeps `backoff_unit × backoff_base^k` unless
//! `k` was the last attempt, in which case the error is returned unchanged.
//! With the defaults (3 attempts, base 2, 1 s unit) that is 1 s → 2 s → give up.
//!
//! The sleep is an async suspension of the current item only; other items of
//! the batch keep running.

use crate::config::{RetryConfig, RetryOn};
use crate::error::CallError;
use crate::ratelimit::RateLimiter;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Suspends the current task for a backoff interval.
///
/// Production code uses [`TokioSleeper`]; tests substitute a recorder.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }
}

/// Classification of one attempt's result.
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    /// The call succeeded; stop.
    Success(T),
    /// The call failed and another attempt is allowed.
    RetryableFailure(CallError),
    /// The call failed and no further attempt will be made.
    TerminalFailure(CallError),
}

impl<T> AttemptOutcome<T> {
    /// Classify `result` of attempt `attempt_index` under `config`.
    pub fn classify(
        result: Result<T, CallError>,
        attempt_index: u32,
        config: &RetryConfig,
    ) -> Self {
        match result {
            Ok(value) => AttemptOutcome::Success(value),
            Err(e) if attempt_index + 1 >= config.max_retries => {
                AttemptOutcome::TerminalFailure(e)
            }
            Err(CallError::Cancelled) => AttemptOutcome::TerminalFailure(CallError::Cancelled),
            Err(e) if config.retry_on == RetryOn::TransientOnly && !e.is_transient() => {
                AttemptOutcome::TerminalFailure(e)
            }
            Err(e) => AttemptOutcome::RetryableFailure(e),
        }
    }
}

/// Result of a retried call together with the number of attempts it took.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, CallError>,
    pub attempts: u32,
}

/// Hooks the batch executor threads through each attempt.
#[derive(Default, Clone, Copy)]
pub(crate) struct Gate<'a> {
    /// Permit taken before every attempt.
    pub limiter: Option<&'a RateLimiter>,
    /// Stop scheduling attempts once cancelled.
    pub cancel: Option<&'a CancellationToken>,
    /// Forward `Retry-After` hints to the limiter.
    pub adaptive: bool,
    /// Told about each backoff as `(failed_attempt, wait)`.
    pub observer: Option<&'a (dyn Fn(u32, Duration) + Send + Sync)>,
}

/// Retry-with-backoff wrapper. Holds no per-call state, so one policy can
/// serve any number of concurrent calls.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("sleeper", &"<dyn Sleeper>")
            .finish()
    }
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replace the backoff sleeper.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `call` until it succeeds or the attempt budget is spent.
    ///
    /// Returns the first success, or the error of the final attempt unchanged.
    pub async fn execute<T, F, Fut>(&self, call: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        self.execute_counted(call).await.result
    }

    /// Like [`execute`](Self::execute), also reporting how many attempts ran.
    pub async fn execute_counted<T, F, Fut>(&self, call: F) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        self.execute_gated(Gate::default(), call).await
    }

    pub(crate) async fn execute_gated<T, F, Fut>(&self, gate: Gate<'_>, mut call: F) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let max = self.config.max_retries.max(1);
        let mut attempt: u32 = 0;

        loop {
            if gate.cancel.is_some_and(CancellationToken::is_cancelled) {
                return cancelled(attempt);
            }

            if let Some(limiter) = gate.limiter {
                match gate.cancel {
                    Some(cancel) => {
                        tokio::select! {
                            _ = cancel.cancelled() => return cancelled(attempt),
                            _ = limiter.acquire() => {}
                        }
                    }
                    None => limiter.acquire().await,
                }
            }

            let result = self.attempt(&mut call).await;

            match AttemptOutcome::classify(result, attempt, &self.config) {
                AttemptOutcome::Success(value) => {
                    if attempt > 0 {
                        debug!("Call succeeded on attempt {}/{}", attempt + 1, max);
                    }
                    return Attempted {
                        result: Ok(value),
                        attempts: attempt + 1,
                    };
                }
                AttemptOutcome::TerminalFailure(e) => {
                    debug!("Attempt {}/{} failed, giving up: {}", attempt + 1, max, e);
                    return Attempted {
                        result: Err(e),
                        attempts: attempt + 1,
                    };
                }
                AttemptOutcome::RetryableFailure(e) => {
                    if gate.adaptive {
                        if let (Some(limiter), Some(secs)) = (gate.limiter, e.retry_after_secs()) {
                            limiter.hold_off(Duration::from_secs(secs));
                        }
                    }

                    let wait = self.config.backoff_for(attempt);
                    warn!(
                        "Attempt {}/{} failed ({}). Retrying in {:?}",
                        attempt + 1,
                        max,
                        e,
                        wait
                    );
                    if let Some(observer) = gate.observer {
                        observer(attempt + 1, wait);
                    }

                    match gate.cancel {
                        Some(cancel) => {
                            tokio::select! {
                                _ = cancel.cancelled() => return cancelled(attempt + 1),
                                _ = self.sleeper.sleep(wait) => {}
                            }
                        }
                        None => self.sleeper.sleep(wait).await,
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// One attempt, bounded by the per-attempt timeout when configured.
    async fn attempt<T, F, Fut>(&self, call: &mut F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        match self.config.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, call()).await {
                Ok(result) => result,
                Err(_) => Err(CallError::Timeout {
                    after_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                }),
            },
            None => call().await,
        }
    }
}

fn cancelled<T>(attempts: u32) -> Attempted<T> {
    Attempted {
        result: Err(CallError::Cancelled),
        attempts,
    }
}
