//! Configuration types for batch submission.
//!
//! All batch behaviour is controlled through [`BatchConfig`], built via its
//! [`BatchConfigBuilder`]. Configuration is resolved once at the program's
//! entry boundary (the CLI, or the embedding application) and handed to the
//! executor explicitly; nothing in the library reads ambient global state.

use crate::error::BatchError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Length of the rolling window over which `rate_limit_per_minute` is counted.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Longest batch-wide hold-off a server `Retry-After` hint may impose.
/// Larger hints are clamped to this.
pub const MAX_HOLD_OFF: Duration = Duration::from_secs(10 * 60);

/// Which failures the retry layer is allowed to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RetryOn {
    /// Retry every error, including ones that will never succeed
    /// (malformed input, bad credentials). (default)
    #[default]
    AnyError,
    /// Retry only errors for which [`crate::error::CallError::is_transient`]
    /// holds; permanent errors are terminal on first occurrence.
    TransientOnly,
}

/// Retry and backoff settings for a single remote call.
///
/// The wait after failed attempt `k` (counting from 0) is
/// `backoff_unit × backoff_base^k`. With `max_retries = 3` and
/// `backoff_base = 2` the sequence is 1 unit, 2 units, then the third failure
/// is returned to the caller. Fractional bases such as 1.5 are allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, including the first. Must be ≥ 1. Default: 3.
    pub max_retries: u32,

    /// Exponential growth factor between waits. Must be finite and ≥ 1.
    /// Default: 2.
    pub backoff_base: f64,

    /// Duration of one backoff "time unit". Default: 1 s.
    pub backoff_unit: Duration,

    /// Which errors are retried. Default: [`RetryOn::AnyError`].
    pub retry_on: RetryOn,

    /// Deadline for a single attempt. Default: none.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2.0,
            backoff_unit: Duration::from_secs(1),
            retry_on: RetryOn::default(),
            attempt_timeout: None,
        }
    }
}

impl RetryConfig {
    /// Wait before the attempt following failed attempt `attempt_index`.
    ///
    /// Saturates at [`Duration::MAX`] instead of overflowing.
    pub fn backoff_for(&self, attempt_index: u32) -> Duration {
        let exponent = i32::try_from(attempt_index).unwrap_or(i32::MAX);
        let secs = self.backoff_unit.as_secs_f64() * self.backoff_base.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Check invariants; called before any attempt is made.
    pub fn validate(&self) -> Result<(), BatchError> {
        if self.max_retries == 0 {
            return Err(BatchError::InvalidConfig(
                "max_retries must be ≥ 1 (it counts the first attempt)".into(),
            ));
        }
        if !self.backoff_base.is_finite() || self.backoff_base < 1.0 {
            return Err(BatchError::InvalidConfig(format!(
                "backoff_base must be a finite number ≥ 1, got {}",
                self.backoff_base
            )));
        }
        if self.attempt_timeout == Some(Duration::ZERO) {
            return Err(BatchError::InvalidConfig(
                "attempt_timeout must be non-zero when set".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for a batch run.
///
/// # Example
/// ```rust
/// use edgequake_doc2x::BatchConfig;
///
/// let config = BatchConfig::builder()
///     .max_retries(3)
///     .backoff_base(2.0)
///     .rate_limit_per_minute(10)
///     .build()
///     .unwrap();
/// assert_eq!(config.in_flight_limit(), 10);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Per-call retry policy.
    pub retry: RetryConfig,

    /// Maximum number of call attempts (first attempts and retries alike)
    /// started per rolling 60-second window across the whole batch.
    /// Must be ≥ 1. Default: 4.
    ///
    /// Personal Doc2X keys allow roughly 4 requests per minute, `sk-` keys 10;
    /// see [`crate::settings::default_rpm`].
    pub rate_limit_per_minute: u32,

    /// Upper bound on items in flight at once. Default: 10.
    ///
    /// The effective bound is `min(concurrency, rate_limit_per_minute)`:
    /// there is no point holding more items open than the window can admit.
    pub concurrency: usize,

    /// Hold back new attempts batch-wide when a throttled call carries a
    /// server `Retry-After` hint. Default: true.
    pub adaptive_throttle: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            rate_limit_per_minute: 4,
            concurrency: 10,
            adaptive_throttle: true,
        }
    }
}

impl BatchConfig {
    /// Create a new builder for `BatchConfig`.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
        }
    }

    /// Number of items allowed in flight simultaneously.
    pub fn in_flight_limit(&self) -> usize {
        self.concurrency
            .min(self.rate_limit_per_minute as usize)
            .max(1)
    }

    /// Check every invariant. Entry points call this before touching items.
    pub fn validate(&self) -> Result<(), BatchError> {
        self.retry.validate()?;
        if self.rate_limit_per_minute == 0 {
            return Err(BatchError::InvalidConfig(
                "rate_limit_per_minute must be ≥ 1".into(),
            ));
        }
        if self.concurrency == 0 {
            return Err(BatchError::InvalidConfig("concurrency must be ≥ 1".into()));
        }
        Ok(())
    }
}

/// Builder for [`BatchConfig`].
#[derive(Debug)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.retry.max_retries = n;
        self
    }

    pub fn backoff_base(mut self, base: f64) -> Self {
        self.config.retry.backoff_base = base;
        self
    }

    pub fn backoff_unit(mut self, unit: Duration) -> Self {
        self.config.retry.backoff_unit = unit;
        self
    }

    pub fn retry_on(mut self, retry_on: RetryOn) -> Self {
        self.config.retry.retry_on = retry_on;
        self
    }

    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.config.retry.attempt_timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn rate_limit_per_minute(mut self, rpm: u32) -> Self {
        self.config.rate_limit_per_minute = rpm;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn adaptive_throttle(mut self, v: bool) -> Self {
        self.config.adaptive_throttle = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BatchConfig, BatchError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
