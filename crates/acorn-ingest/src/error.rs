//! Error taxonomy for the pull pipelines.
//!
//! Three layers:
//! - [`FetchError`]: one outbound request failed (transport, upstream
//!   API error, or response-shape violation).
//! - [`StoreError`]: persistence failed; never retried.
//! - [`PullError`]: a whole run failed (failure budget exhausted, or a
//!   fatal error propagated out of the retry loop).

use std::fmt;

// ---------------------------------------------------------------------------
// Per-request errors
// ---------------------------------------------------------------------------

/// Errors from a single fetch-and-normalize attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Connection-level failure (DNS, refused, reset, timeout).
    Transport(String),
    /// The upstream API answered with a non-success status.
    Api { status: u16, message: String },
    /// The response body violates the expected shape contract.
    ///
    /// Raised by response validation *before* normalization: a response
    /// that is not list-valued, a positional record with the wrong field
    /// count, a non-numeric field, and so on. The offending request is
    /// aborted; nothing from the response is stored.
    MalformedResponse(String),
}

impl FetchError {
    /// Whether the retry loop may re-attempt the same window.
    ///
    /// Policy: malformed responses are retried exactly like transport
    /// errors. Transient upstream hiccups often surface as truncated or
    /// HTML error bodies rather than refused connections, so treating
    /// them as fatal would abort runs that a single retry fixes. The
    /// shared failure budget still bounds pathological cases.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport(_) => true,
            FetchError::Api { .. } => true,
            FetchError::MalformedResponse(_) => true,
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Transport(msg) => write!(f, "transport error: {msg}"),
            FetchError::Api { status, message } => {
                write!(f, "upstream api error status={status}: {message}")
            }
            FetchError::MalformedResponse(msg) => {
                write!(f, "malformed response: {msg}")
            }
        }
    }
}

impl std::error::Error for FetchError {}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// A storage-collaborator failure. Always fatal for the run: the upsert
/// contract makes replays safe, so the caller re-runs after fixing the
/// store rather than hammering it inside the retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError(pub String);

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store error: {}", self.0)
    }
}

impl std::error::Error for StoreError {}

// ---------------------------------------------------------------------------
// Run-level errors
// ---------------------------------------------------------------------------

/// Errors that abort an entire pull run.
#[derive(Debug)]
pub enum PullError {
    /// The retryable-failure budget was exhausted.
    ///
    /// Progress already stored is retained; re-running with the same
    /// interval is safe (insert-if-absent skips what exists).
    TooManyFailures {
        failures: u32,
        last: FetchError,
    },
    /// A non-retryable fetch error propagated out of the loop.
    Fetch(FetchError),
    /// Persistence failed.
    Store(StoreError),
}

impl fmt::Display for PullError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PullError::TooManyFailures { failures, last } => {
                write!(f, "{failures} retryable failures, aborting. last: {last}")
            }
            PullError::Fetch(e) => write!(f, "fetch failed: {e}"),
            PullError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PullError {}
