//! Window planners: partition an outer `[start, end)` interval into
//! per-request fetch windows.
//!
//! Two variants:
//! - [`forward_windows`]: chronological, used by the price pipeline.
//!   Each window spans at most `granularity_secs * record_limit` seconds
//!   so a single request never exceeds the API's record cap.
//! - [`reverse_windows`]: reverse-chronological fixed-size blocks, used
//!   by the trends pipeline, with a configurable coverage overlap so no
//!   data point is lost at block boundaries.
//!
//! Plans are plain `Iterator`s over [`TimeWindow`]: lazy, finite, and
//! restartable by rebuilding with the same arguments.

use chrono::{DateTime, Duration, Utc};

use crate::TimeWindow;

// ---------------------------------------------------------------------------
// Forward plan
// ---------------------------------------------------------------------------

/// Chronological window plan over `[start, end)`.
///
/// Windows are contiguous and non-overlapping; the final window's end is
/// clamped to `end`. If `start >= end`, or either sizing parameter is
/// non-positive, the plan is empty (not an error).
pub fn forward_windows(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    granularity_secs: i64,
    record_limit: i64,
) -> ForwardWindows {
    let span_secs = if granularity_secs > 0 && record_limit > 0 {
        granularity_secs.saturating_mul(record_limit)
    } else {
        0
    };
    ForwardWindows { cursor: start, end, span_secs }
}

#[derive(Debug, Clone)]
pub struct ForwardWindows {
    cursor: DateTime<Utc>,
    end: DateTime<Utc>,
    span_secs: i64,
}

impl Iterator for ForwardWindows {
    type Item = TimeWindow;

    fn next(&mut self) -> Option<TimeWindow> {
        if self.span_secs <= 0 || self.cursor >= self.end {
            return None;
        }
        let next_end = (self.cursor + Duration::seconds(self.span_secs)).min(self.end);
        let win = TimeWindow { start: self.cursor, end: next_end };
        self.cursor = next_end;
        Some(win)
    }
}

// ---------------------------------------------------------------------------
// Reverse plan
// ---------------------------------------------------------------------------

/// Reverse-chronological window plan walking backward from `end` in
/// `step_secs` blocks until reaching `start`.
///
/// Consecutive windows share `overlap_secs` of coverage (a single data
/// point at the feed's granularity) so boundary observations are fetched
/// by both neighbours; the store's natural key dedupes them. The earliest
/// window is clamped to `start`. If `start >= end` or `step_secs <= 0`,
/// the plan is empty. Overlaps of `step_secs` or more are clamped to zero
/// so the cursor always makes progress.
pub fn reverse_windows(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    step_secs: i64,
    overlap_secs: i64,
) -> ReverseWindows {
    let overlap_secs = if overlap_secs > 0 && overlap_secs < step_secs {
        overlap_secs
    } else {
        0
    };
    ReverseWindows { cursor_end: end, start, step_secs, overlap_secs }
}

#[derive(Debug, Clone)]
pub struct ReverseWindows {
    cursor_end: DateTime<Utc>,
    start: DateTime<Utc>,
    step_secs: i64,
    overlap_secs: i64,
}

impl Iterator for ReverseWindows {
    type Item = TimeWindow;

    fn next(&mut self) -> Option<TimeWindow> {
        if self.step_secs <= 0 || self.cursor_end <= self.start {
            return None;
        }
        let win_start = (self.cursor_end - Duration::seconds(self.step_secs)).max(self.start);
        let win = TimeWindow { start: win_start, end: self.cursor_end };

        self.cursor_end = if win_start <= self.start {
            // Final (clamped) block: terminate.
            self.start
        } else {
            win_start + Duration::seconds(self.overlap_secs)
        };
        Some(win)
    }
}
