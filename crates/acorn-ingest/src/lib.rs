//! acorn-ingest
//!
//! Core ETL logic for the acorn downloaders: window planning, source
//! adapters (fetch + normalize), the retry-bounded pull runner, and the
//! gap-filling series aligner.
//!
//! This crate does **not** write to the database. Persistence sits behind
//! the [`adapter::RecordStore`] trait; callers (CLI) wire in `acorn-db`
//! or an in-memory store for tests.

pub mod adapter;
pub mod align;
pub mod error;
pub mod price;
pub mod runner;
pub mod trends;
pub mod window;

use chrono::{DateTime, Utc};

/// A half-open `[start, end)` fetch window.
///
/// Invariant: `start < end` for every window produced by the planners in
/// [`window`]. An empty outer interval produces an empty plan, never a
/// degenerate window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Window length in whole seconds.
    pub fn span_secs(&self) -> i64 {
        (self.end - self.start).num_seconds()
    }
}

/// Parameters for exactly one outbound request.
///
/// Built by the runner per `(subject, window)` pair and discarded after
/// the fetch completes.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    /// Product id (`"BTC-USD"`) or encoded keyword list (see
    /// [`trends::subject_from_keywords`]).
    pub subject: String,
    /// Fixed time-bucket width of the requested series, in seconds.
    pub granularity_secs: i64,
    pub window: TimeWindow,
}
