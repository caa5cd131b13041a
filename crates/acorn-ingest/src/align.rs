//! Gap-filling and series alignment.
//!
//! Pure functions: no fetching, no persistence. A retrieved series is
//! reindexed onto a complete fixed-interval timestamp grid so that
//! heterogeneous series (close vs. volume, product vs. product) share
//! one timestamp axis before downstream joins. Grid points with no
//! source observation are explicit `None`, never dropped and never
//! interpolated.

use std::collections::BTreeMap;
use std::io;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

/// Build the timestamp grid `start + k*step` for `k = 0, 1, 2, ...`,
/// stopping at the first grid point `>= end` (inclusive).
///
/// The grid always contains `start`. For `end > start` its length is
/// exactly `ceil((end - start) / step) + 1`. A non-positive step yields
/// the degenerate single-point grid.
pub fn grid(start_ts: i64, end_ts: i64, step_secs: i64) -> Vec<i64> {
    let mut out = vec![start_ts];
    if step_secs <= 0 {
        return out;
    }
    while *out.last().unwrap_or(&start_ts) < end_ts {
        out.push(out.last().unwrap() + step_secs);
    }
    out
}

/// Reindex `series` onto the grid over `[start, end]`.
///
/// Source observations landing exactly on a grid point pass through
/// unchanged; everything else in the source is ignored (off-grid points
/// are a data bug upstream, not something to silently shift).
pub fn fill_gaps(
    series: &BTreeMap<i64, f64>,
    start_ts: i64,
    end_ts: i64,
    step_secs: i64,
) -> Vec<(i64, Option<f64>)> {
    grid(start_ts, end_ts, step_secs)
        .into_iter()
        .map(|ts| (ts, series.get(&ts).copied()))
        .collect()
}

// ---------------------------------------------------------------------------
// Aligned frame
// ---------------------------------------------------------------------------

/// Several named series aligned onto one timestamp grid.
///
/// Column order is deterministic (BTreeMap by name); every column has
/// exactly one cell per grid point.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedFrame {
    grid: Vec<i64>,
    columns: BTreeMap<String, Vec<Option<f64>>>,
}

impl AlignedFrame {
    pub fn new(start_ts: i64, end_ts: i64, step_secs: i64) -> Self {
        Self { grid: grid(start_ts, end_ts, step_secs), columns: BTreeMap::new() }
    }

    /// Gap-fill `series` onto the frame's grid and store it as `name`.
    /// Re-inserting a name replaces the previous column.
    pub fn insert_series(&mut self, name: &str, series: &BTreeMap<i64, f64>) {
        let cells = self.grid.iter().map(|ts| series.get(ts).copied()).collect();
        self.columns.insert(name.to_string(), cells);
    }

    pub fn n_rows(&self) -> usize {
        self.grid.len()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|s| s.as_str())
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns.get(name).map(|c| c.as_slice())
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.grid
    }

    /// Write the frame as CSV: `ts,dt,<columns...>` with empty cells for
    /// missing values.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut w = csv::Writer::from_writer(writer);

        let mut header = vec!["ts".to_string(), "dt".to_string()];
        header.extend(self.columns.keys().cloned());
        w.write_record(&header).context("write csv header failed")?;

        for (i, ts) in self.grid.iter().enumerate() {
            let dt = DateTime::<Utc>::from_timestamp(*ts, 0)
                .map(|d| d.to_rfc3339())
                .unwrap_or_default();
            let mut rec = vec![ts.to_string(), dt];
            for cells in self.columns.values() {
                rec.push(match cells[i] {
                    Some(v) => v.to_string(),
                    None => String::new(),
                });
            }
            w.write_record(&rec).context("write csv row failed")?;
        }
        w.flush().context("flush csv failed")?;
        Ok(())
    }
}
