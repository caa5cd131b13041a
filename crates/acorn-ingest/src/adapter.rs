//! Adapter boundary between the pull runner and its collaborators.
//!
//! This module defines **only** the two trait seams:
//! - [`SourceAdapter`]: one concrete type per remote data source
//!   (price candles, interest-over-time, interest-by-region), split into
//!   `fetch` and `normalize` so the shape contract is checked in one
//!   place and normalization stays a pure function.
//! - [`RecordStore`]: insert-if-absent persistence keyed by the
//!   record's natural key.
//!
//! No concrete clients, no SQL, and no retry logic belong here.

use crate::error::{FetchError, StoreError};
use crate::QuerySpec;

/// A remote read-only data source.
///
/// Implementations must be `Send + Sync` so a single adapter instance can
/// be driven across await points by the runner.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Raw response payload, alive only between fetch and normalize.
    type Raw: Send;
    /// Normalized flat record carrying the natural key.
    type Record: Send + Sync;

    /// Short source name for logs (e.g. `"price"`).
    fn name(&self) -> &'static str;

    /// Issue exactly one outbound call for `spec`.
    ///
    /// Pacing is the runner's job; implementations must not sleep.
    async fn fetch(&self, spec: &QuerySpec) -> Result<Self::Raw, FetchError>;

    /// Validate the raw response shape and map it to normalized records.
    ///
    /// Any shape mismatch fails the whole request with
    /// [`FetchError::MalformedResponse`]; partial output is never
    /// returned.
    fn normalize(&self, raw: Self::Raw, spec: &QuerySpec) -> Result<Vec<Self::Record>, FetchError>;
}

/// Insert-if-absent persistence for one record type.
///
/// `upsert` returns `true` when a new row was created and `false` when a
/// row with the same natural key already existed. Existing rows are
/// **never** updated: stored price/trend values for a given key are
/// expected to be stable, so replaying a window after a partial failure
/// must not corrupt them.
#[async_trait::async_trait]
pub trait RecordStore<R>: Send + Sync {
    async fn upsert(&self, record: &R) -> Result<bool, StoreError>;
}
