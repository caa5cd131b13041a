//! Command handler modules for acorn-cli.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod features;
pub mod pull;

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};

use acorn_config::AppConfig;
use acorn_ingest::runner::{PacingPolicy, PullReport};

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Parse a CLI timestamp: RFC3339, or a bare `YYYY-MM-DD` taken as UTC
/// midnight.
pub fn parse_utc(raw: &str, flag: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let d = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("invalid {flag} '{raw}'. expected RFC3339 or YYYY-MM-DD"))?;
    let naive = d
        .and_hms_opt(0, 0, 0)
        .with_context(|| format!("invalid {flag} '{raw}'"))?;
    Ok(DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// Parse and order-check an interval from `--start`/`--end`.
pub fn parse_interval(start: &str, end: &str) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let s = parse_utc(start, "--start")?;
    let e = parse_utc(end, "--end")?;
    if e <= s {
        anyhow::bail!("--end must be after --start");
    }
    Ok((s, e))
}

/// Runner policy: defaults overridden by the config file's pacing
/// section, budget from the CLI flag.
pub fn pacing_policy(config: &AppConfig, max_failures: u32) -> PacingPolicy {
    let mut policy = PacingPolicy { max_failures, ..PacingPolicy::default() };
    if let Some(ms) = config.pacing.request_pause_ms {
        policy.request_pause = Duration::from_millis(ms);
    }
    if let Some(ms) = config.pacing.failure_cooldown_ms {
        policy.failure_cooldown = Duration::from_millis(ms);
    }
    policy
}

/// Products for a pull/export: CLI `--product` flags win over config.
pub fn effective_products(config: &AppConfig, cli_products: &[String]) -> Vec<String> {
    if cli_products.is_empty() {
        config.products.clone()
    } else {
        cli_products.to_vec()
    }
}

/// Print a finished run's counters, key=value per line.
pub fn print_report(report: &PullReport) {
    println!("pull_ok=true pull_id={} source={}", report.pull_id, report.source);
    println!(
        "windows_completed={} requests={} retries={}",
        report.windows_completed, report.requests, report.retries
    );
    println!(
        "records_fetched={} records_inserted={} records_skipped={}",
        report.records_fetched, report.records_inserted, report.records_skipped
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_bare_date_as_utc_midnight() {
        let dt = parse_utc("2018-01-01", "--start").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn parses_rfc3339_with_offset() {
        let dt = parse_utc("2018-01-01T06:00:00+02:00", "--start").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2018, 1, 1, 4, 0, 0).unwrap());
    }

    #[test]
    fn rejects_garbage_naming_the_flag() {
        let err = parse_utc("yesterday", "--end").unwrap_err();
        assert!(err.to_string().contains("--end"));
    }

    #[test]
    fn interval_must_be_forward() {
        assert!(parse_interval("2018-01-02", "2018-01-01").is_err());
        assert!(parse_interval("2018-01-01", "2018-01-01").is_err());
        assert!(parse_interval("2018-01-01", "2018-01-02").is_ok());
    }

    #[test]
    fn pacing_overrides_apply() {
        let mut config = AppConfig::defaults();
        config.pacing.request_pause_ms = Some(250);

        let policy = pacing_policy(&config, 5);
        assert_eq!(policy.request_pause, Duration::from_millis(250));
        assert_eq!(policy.failure_cooldown, Duration::from_secs(60));
        assert_eq!(policy.max_failures, 5);
    }

    #[test]
    fn cli_products_override_config() {
        let config = AppConfig::defaults();
        assert_eq!(effective_products(&config, &[]), config.products);
        assert_eq!(
            effective_products(&config, &["XRP-USD".to_string()]),
            vec!["XRP-USD".to_string()]
        );
    }
}
