//! Error types for the edgequake-doc2x library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`BatchError`] — **Fatal**: the batch cannot proceed at all (invalid
//!   configuration, input folder missing, settings unreadable). Returned as
//!   `Err(BatchError)` from the top-level entry points, always *before* any
//!   remote call is attempted.
//!
//! * [`CallError`] — **Non-fatal**: a single remote call failed (throttled,
//!   network blip, server error). The retry layer consumes it; once retries are
//!   exhausted it is stored inside [`crate::output::ItemFailure`] so the rest of
//!   the batch carries on.
//!
//! [`CallError::RateLimited`] is the rate-limit signal: any remote call must
//! return it when the service reports throttling (HTTP 429 or a quota
//! response), as opposed to any other failure.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All fatal errors returned by the edgequake-doc2x library.
///
/// Per-item failures use [`CallError`] and are recorded in
/// [`crate::output::ResultAggregate`] rather than propagated here.
#[derive(Debug, Error)]
pub enum BatchError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or pre-flight validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file or folder was not found at the given path.
    #[error("Input not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the input.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The input path exists but contains nothing of the requested kind.
    #[error("No {kind} files found under '{path}'")]
    NoInputs { path: PathBuf, kind: String },

    // ── Settings errors ───────────────────────────────────────────────────
    /// The persisted settings file could not be read, parsed, or written.
    #[error("Settings error ({path}): {detail}")]
    Settings { path: PathBuf, detail: String },

    // ── Client errors ─────────────────────────────────────────────────────
    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Some items succeeded but at least one failed.
    ///
    /// Returned by [`crate::output::ResultAggregate::into_result`] when the
    /// caller wants to treat any item failure as an error.
    #[error("{failed}/{total} items failed during the batch")]
    PartialFailure {
        success: usize,
        failed: usize,
        total: usize,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single remote call.
///
/// Cloneable and serialisable so that the terminal error of an item can be
/// kept in its failure record and emitted as JSON by the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CallError {
    /// The remote service is throttling; the requested work was not done.
    #[error("rate limit exceeded{}", retry_after_hint(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    /// Connection refused, reset, DNS failure…
    #[error("network error: {0}")]
    Network(String),

    /// A single attempt exceeded its deadline.
    #[error("call timed out after {}", fmt_millis(.after_ms))]
    Timeout { after_ms: u64 },

    /// The service answered with an error status.
    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// The service answered 2xx but the body could not be understood.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The service rejected the input itself; retrying will not help.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Authentication failed (401/403).
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Local I/O failed while preparing the request.
    #[error("I/O error: {0}")]
    Io(String),

    /// The batch was cancelled before this item could finish.
    #[error("cancelled before completion")]
    Cancelled,

    /// Anything else a caller-supplied remote call wants to report.
    #[error("{0}")]
    Other(String),
}

fn fmt_millis(ms: &u64) -> String {
    format!("{:?}", Duration::from_millis(*ms))
}

fn retry_after_hint(secs: &Option<u64>) -> String {
    match secs {
        Some(s) => format!(" (retry after {s}s)"),
        None => String::new(),
    }
}

impl CallError {
    /// `true` for the distinguished "try again later" signal.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, CallError::RateLimited { .. })
    }

    /// `true` for failures that may plausibly succeed on a later attempt.
    ///
    /// Only consulted when [`crate::config::RetryOn::TransientOnly`] is
    /// configured; the default policy retries every error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CallError::RateLimited { .. }
                | CallError::Network(_)
                | CallError::Timeout { .. }
                | CallError::Server { .. }
                | CallError::Io(_)
                | CallError::Other(_)
        )
    }

    /// Server-supplied hold-off hint, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            CallError::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }
}

impl From<std::io::Error> for CallError {
    fn from(e: std::io::Error) -> Self {
        CallError::Io(e.to_string())
    }
}
