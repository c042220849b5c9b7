//! # edgequake-doc2x
//!
//! Run a batch of independent remote calls against a rate-limited service,
//! with retry, backoff and per-item failure isolation.
//!
//! ## Why this crate?
//!
//! Document conversion services (Doc2X and friends) meter callers in requests
//! per minute and answer bursts with HTTP 429. A naive loop either crawls one
//! file at a time or trips the quota and loses work. This crate fans a batch
//! out under a shared sliding-window limiter, retries each failed attempt with
//! exponential backoff, and always hands back one outcome per input, in input
//! order, even when some items never succeed.
//!
//! ## Execution Overview
//!
//! ```text
//! items[0..N]
//!  │
//!  ├─ 1. Validate  BatchConfig checked before any call (max_retries ≥ 1, rpm ≥ 1)
//!  ├─ 2. Schedule  min(concurrency, rpm) items in flight (buffer_unordered)
//!  ├─ 3. Gate      every attempt takes a permit from one RateLimiter (per 60s)
//!  ├─ 4. Call      caller-supplied async fn(&item) -> Result<T, CallError>
//!  ├─ 5. Retry     wait backoff_unit × base^k after failed attempt k
//!  └─ 6. Collect   slots → ResultAggregate { successes, failures } in input order
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_doc2x::{run, BatchConfig, CallError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BatchConfig::builder()
//!         .rate_limit_per_minute(4)
//!         .max_retries(3)
//!         .build()?;
//!     let files = vec!["a.pdf", "b.pdf", "c.pdf"];
//!     let aggregate = run(&files, |name| {
//!         let name = name.to_string();
//!         async move {
//!             // Call the remote service here. Return CallError::RateLimited
//!             // when it reports throttling.
//!             Ok::<_, CallError>(name.to_uppercase())
//!         }
//!     }, &config).await?;
//!
//!     for ok in aggregate.successes() {
//!         println!("{} -> {}", ok.id, ok.value);
//!     }
//!     for failed in aggregate.failures() {
//!         eprintln!("{}", failed.description());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doc2x` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-doc2x = { version = "0.1", default-features = false }
//! ```
//!
//! ## Choosing a Rate Limit
//!
//! | Key | Requests/min | 60 files take |
//! |-----|--------------|---------------|
//! | personal | 4 | ~15 min |
//! | `sk-…` (paid) | 10 | ~6 min |
//!
//! Retries count against the same quota as first attempts.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod input;
pub mod output;
pub mod progress;
pub mod ratelimit;
pub mod retry;
pub mod settings;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{run, BatchExecutor};
pub use client::{ClientConfig, ConversionClient, ConvertedDocument};
pub use config::{
    BatchConfig, BatchConfigBuilder, RetryConfig, RetryOn, MAX_HOLD_OFF, RATE_WINDOW,
};
pub use error::{BatchError, CallError};
pub use input::{discover, write_output, FileKind, InputFile, OutputFormat};
pub use output::{BatchStats, ItemFailure, ItemOutcome, ItemSuccess, ResultAggregate};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use ratelimit::RateLimiter;
pub use retry::{AttemptOutcome, Attempted, RetryPolicy, Sleeper, TokioSleeper};
pub use settings::Settings;
pub use stream::OutcomeStream;
pub use tokio_util::sync::CancellationToken;
