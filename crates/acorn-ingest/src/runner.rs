//! Retry-bounded pull runner.
//!
//! Drives a window plan across the outer interval; for each window, for
//! each subject: pace, fetch, normalize, upsert. On a retryable failure
//! the runner sleeps a cooldown and re-attempts the **same** window from
//! its first subject; the cursor only advances after a window's requests
//! all succeed. A shared failure counter aborts the whole run with
//! [`PullError::TooManyFailures`] once the caller's budget is reached.
//!
//! Fully sequential by design: the dominant constraint is the remote
//! API's shared rate limit, so there is exactly one request in flight and
//! the only suspension points are the pacing pause and the cooldown.

use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{RecordStore, SourceAdapter};
use crate::error::{FetchError, PullError, StoreError};
use crate::{QuerySpec, TimeWindow};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Pacing and failure-budget policy for one run.
#[derive(Debug, Clone)]
pub struct PacingPolicy {
    /// Fixed pause before every outbound request. Static conservative
    /// approximation of the API's requests/second cap, not adaptive
    /// backoff.
    pub request_pause: Duration,
    /// Pause after a retryable failure, before re-attempting the same
    /// window. Independent of and longer than `request_pause`.
    pub failure_cooldown: Duration,
    /// Retryable-failure budget for the whole run.
    pub max_failures: u32,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            // The exchange caps public endpoints at a few requests per
            // second; one per second stays well clear.
            request_pause: Duration::from_secs(1),
            failure_cooldown: Duration::from_secs(60),
            max_failures: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Run arguments / report
// ---------------------------------------------------------------------------

/// Caller-supplied parameters for one pull run.
#[derive(Debug, Clone)]
pub struct PullArgs {
    /// One fetch per subject per window, in order.
    pub subjects: Vec<String>,
    /// Granularity stamped into every `QuerySpec`.
    pub granularity_secs: i64,
    /// Optional caller-provided id for log correlation; generated when
    /// absent.
    pub pull_id: Option<Uuid>,
}

/// Outcome counters for a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullReport {
    pub pull_id: Uuid,
    pub source: &'static str,
    pub windows_completed: u64,
    pub requests: u64,
    pub records_fetched: u64,
    pub records_inserted: u64,
    /// Records whose natural key already existed (idempotent skip).
    pub records_skipped: u64,
    pub retries: u64,
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

enum WindowError {
    Fetch(FetchError),
    Store(StoreError),
}

/// Pull every `(window, subject)` pair and persist the normalized
/// records.
///
/// Progress already stored is retained on abort; re-running the same
/// interval is safe because the store skips existing natural keys.
pub async fn run_pull<A, S, W>(
    adapter: &A,
    store: &S,
    windows: W,
    args: &PullArgs,
    policy: &PacingPolicy,
) -> Result<PullReport, PullError>
where
    A: SourceAdapter,
    S: RecordStore<A::Record>,
    W: IntoIterator<Item = TimeWindow>,
{
    let pull_id = args.pull_id.unwrap_or_else(Uuid::new_v4);
    let mut report = PullReport {
        pull_id,
        source: adapter.name(),
        windows_completed: 0,
        requests: 0,
        records_fetched: 0,
        records_inserted: 0,
        records_skipped: 0,
        retries: 0,
    };
    let mut failures: u32 = 0;

    info!(
        source = adapter.name(),
        %pull_id,
        subjects = args.subjects.len(),
        max_failures = policy.max_failures,
        "pull starting"
    );

    for window in windows {
        loop {
            match pull_window(adapter, store, &window, args, policy, &mut report).await {
                Ok(()) => {
                    report.windows_completed += 1;
                    break;
                }
                Err(WindowError::Fetch(e)) if e.is_retryable() => {
                    failures += 1;
                    warn!(
                        source = adapter.name(),
                        %pull_id,
                        failures,
                        error = %e,
                        "retryable failure, window will be re-attempted"
                    );
                    if failures >= policy.max_failures {
                        return Err(PullError::TooManyFailures { failures, last: e });
                    }
                    report.retries += 1;
                    tokio::time::sleep(policy.failure_cooldown).await;
                }
                Err(WindowError::Fetch(e)) => return Err(PullError::Fetch(e)),
                Err(WindowError::Store(e)) => return Err(PullError::Store(e)),
            }
        }
    }

    info!(
        source = adapter.name(),
        %pull_id,
        windows = report.windows_completed,
        inserted = report.records_inserted,
        skipped = report.records_skipped,
        "pull finished"
    );
    Ok(report)
}

async fn pull_window<A, S>(
    adapter: &A,
    store: &S,
    window: &TimeWindow,
    args: &PullArgs,
    policy: &PacingPolicy,
    report: &mut PullReport,
) -> Result<(), WindowError>
where
    A: SourceAdapter,
    S: RecordStore<A::Record>,
{
    for subject in &args.subjects {
        tokio::time::sleep(policy.request_pause).await;

        let spec = QuerySpec {
            subject: subject.clone(),
            granularity_secs: args.granularity_secs,
            window: *window,
        };
        debug!(
            source = adapter.name(),
            subject = %spec.subject,
            start = %spec.window.start,
            end = %spec.window.end,
            "fetching window"
        );

        let raw = adapter.fetch(&spec).await.map_err(WindowError::Fetch)?;
        report.requests += 1;
        let records = adapter.normalize(raw, &spec).map_err(WindowError::Fetch)?;
        report.records_fetched += records.len() as u64;

        for record in &records {
            let created = store.upsert(record).await.map_err(WindowError::Store)?;
            if created {
                report.records_inserted += 1;
            } else {
                report.records_skipped += 1;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use chrono::{TimeZone, Utc};

    use crate::window::forward_windows;

    /// Adapter that yields one record per window and fails the first
    /// `fail_first` fetch attempts with a transport error.
    struct FlakySource {
        fail_first: u32,
        attempts: AtomicU32,
    }

    impl FlakySource {
        fn new(fail_first: u32) -> Self {
            Self { fail_first, attempts: AtomicU32::new(0) }
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl SourceAdapter for FlakySource {
        type Raw = i64;
        type Record = (String, i64);

        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn fetch(&self, spec: &QuerySpec) -> Result<i64, FetchError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(FetchError::Transport("injected".into()));
            }
            Ok(spec.window.start.timestamp())
        }

        fn normalize(&self, raw: i64, spec: &QuerySpec) -> Result<Vec<(String, i64)>, FetchError> {
            Ok(vec![(spec.subject.clone(), raw)])
        }
    }

    /// In-memory insert-if-absent store keyed by the whole record.
    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<BTreeSet<(String, i64)>>,
    }

    #[async_trait::async_trait]
    impl RecordStore<(String, i64)> for MemoryStore {
        async fn upsert(&self, record: &(String, i64)) -> Result<bool, StoreError> {
            Ok(self.rows.lock().unwrap().insert(record.clone()))
        }
    }

    /// Store that fails every upsert.
    struct BrokenStore;

    #[async_trait::async_trait]
    impl RecordStore<(String, i64)> for BrokenStore {
        async fn upsert(&self, _record: &(String, i64)) -> Result<bool, StoreError> {
            Err(StoreError("pool closed".into()))
        }
    }

    fn fast_policy(max_failures: u32) -> PacingPolicy {
        PacingPolicy {
            request_pause: Duration::ZERO,
            failure_cooldown: Duration::ZERO,
            max_failures,
        }
    }

    fn two_hour_plan() -> impl Iterator<Item = TimeWindow> {
        forward_windows(
            Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2018, 1, 1, 2, 0, 0).unwrap(),
            3600,
            1,
        )
    }

    fn args(subjects: &[&str]) -> PullArgs {
        PullArgs {
            subjects: subjects.iter().map(|s| s.to_string()).collect(),
            granularity_secs: 3600,
            pull_id: None,
        }
    }

    #[tokio::test]
    async fn clean_run_advances_once_per_window() {
        let adapter = FlakySource::new(0);
        let store = MemoryStore::default();

        let report = run_pull(&adapter, &store, two_hour_plan(), &args(&["BTC-USD"]), &fast_policy(10))
            .await
            .unwrap();

        assert_eq!(report.windows_completed, 2);
        assert_eq!(report.requests, 2);
        assert_eq!(report.records_inserted, 2);
        assert_eq!(report.records_skipped, 0);
        assert_eq!(report.retries, 0);
        assert_eq!(store.rows.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn recovers_when_failures_stay_under_budget() {
        // First 3 attempts fail, budget is 10: the run must complete and
        // still store every window exactly once.
        let adapter = FlakySource::new(3);
        let store = MemoryStore::default();

        let report = run_pull(&adapter, &store, two_hour_plan(), &args(&["BTC-USD"]), &fast_policy(10))
            .await
            .unwrap();

        assert_eq!(report.windows_completed, 2);
        assert_eq!(report.retries, 3);
        assert_eq!(store.rows.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn aborts_after_exactly_max_failures_attempts() {
        let adapter = FlakySource::new(u32::MAX);
        let store = MemoryStore::default();

        let err = run_pull(&adapter, &store, two_hour_plan(), &args(&["BTC-USD"]), &fast_policy(4))
            .await
            .unwrap_err();

        match err {
            PullError::TooManyFailures { failures, .. } => assert_eq!(failures, 4),
            other => panic!("expected TooManyFailures, got {other}"),
        }
        assert_eq!(adapter.attempts(), 4);
        assert!(store.rows.lock().unwrap().is_empty());
    }

    /// Adapter that fails exactly one fetch, by attempt index.
    struct FailNth {
        nth: u32,
        attempts: AtomicU32,
    }

    #[async_trait::async_trait]
    impl SourceAdapter for FailNth {
        type Raw = i64;
        type Record = (String, i64);

        fn name(&self) -> &'static str {
            "fail_nth"
        }

        async fn fetch(&self, spec: &QuerySpec) -> Result<i64, FetchError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n == self.nth {
                return Err(FetchError::MalformedResponse("injected".into()));
            }
            Ok(spec.window.start.timestamp())
        }

        fn normalize(&self, raw: i64, spec: &QuerySpec) -> Result<Vec<(String, i64)>, FetchError> {
            Ok(vec![(spec.subject.clone(), raw)])
        }
    }

    #[tokio::test]
    async fn failed_window_is_retried_from_first_subject() {
        // Attempt 1 (the second subject of the first window) fails. The
        // re-attempt must re-fetch subject one; its record already exists
        // so it is skipped, not duplicated.
        let adapter = FailNth { nth: 1, attempts: AtomicU32::new(0) };
        let store = MemoryStore::default();

        let report = run_pull(
            &adapter,
            &store,
            two_hour_plan(),
            &args(&["BTC-USD", "ETH-USD"]),
            &fast_policy(10),
        )
        .await
        .unwrap();

        assert_eq!(report.windows_completed, 2);
        assert_eq!(report.retries, 1);
        // 2 subjects x 2 windows unique rows; the replayed first subject
        // of window one is counted as skipped.
        assert_eq!(store.rows.lock().unwrap().len(), 4);
        assert_eq!(report.records_inserted, 4);
        assert_eq!(report.records_skipped, 1);
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let adapter = FlakySource::new(0);
        let store = MemoryStore::default();
        let policy = fast_policy(10);
        let a = args(&["BTC-USD"]);

        let first = run_pull(&adapter, &store, two_hour_plan(), &a, &policy).await.unwrap();
        let second = run_pull(&adapter, &store, two_hour_plan(), &a, &policy).await.unwrap();

        assert_eq!(first.records_inserted, 2);
        assert_eq!(second.records_inserted, 0);
        assert_eq!(second.records_skipped, 2);
        assert_eq!(store.rows.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn store_failure_is_fatal_not_retried() {
        let adapter = FlakySource::new(0);

        let err = run_pull(&adapter, &BrokenStore, two_hour_plan(), &args(&["BTC-USD"]), &fast_policy(10))
            .await
            .unwrap_err();

        assert!(matches!(err, PullError::Store(_)));
        // One fetch happened, no retry loop engaged.
        assert_eq!(adapter.attempts(), 1);
    }

    #[tokio::test]
    async fn caller_pull_id_is_preserved() {
        let adapter = FlakySource::new(0);
        let store = MemoryStore::default();
        let id = Uuid::new_v4();
        let mut a = args(&["BTC-USD"]);
        a.pull_id = Some(id);

        let report = run_pull(&adapter, &store, two_hour_plan(), &a, &fast_policy(10))
            .await
            .unwrap();
        assert_eq!(report.pull_id, id);
    }
}
