//! Pull command handlers.
//!
//! Each handler wires an adapter, a window plan and the Postgres store
//! into the shared runner, then prints the run's counters. One
//! `pull_id` is generated per invocation and stamped both on the rows
//! the store creates and on the report.

use anyhow::{Context, Result};
use uuid::Uuid;

use acorn_config::AppConfig;
use acorn_db::PgStore;
use acorn_ingest::price::PriceSource;
use acorn_ingest::runner::{run_pull, PullArgs};
use acorn_ingest::trends::{
    subject_from_keywords, InterestByRegionSource, InterestOverTimeSource, TrendsClient,
    TrendsCredentials,
};
use acorn_ingest::window::{forward_windows, reverse_windows};

use super::{effective_products, pacing_policy, parse_interval, print_report};

/// Env-var name for the trends service base URL.
const ENV_TRENDS_URL: &str = "ACORN_TRENDS_URL";

const SECS_PER_DAY: i64 = 86_400;
const SECS_PER_HOUR: i64 = 3_600;

// ---------------------------------------------------------------------------
// Prices
// ---------------------------------------------------------------------------

pub struct PricesArgs {
    pub start: String,
    pub end: String,
    pub granularity: i64,
    pub products: Vec<String>,
    pub record_limit: i64,
    pub max_failures: u32,
}

/// Execute `acorn pull prices`: candles forward-chronologically, one
/// request per product per window.
pub async fn pull_prices(config: &AppConfig, args: PricesArgs) -> Result<()> {
    let (start, end) = parse_interval(&args.start, &args.end)?;
    if args.granularity <= 0 {
        anyhow::bail!("--granularity must be positive");
    }
    if args.record_limit <= 0 {
        anyhow::bail!("--record-limit must be positive");
    }

    let products = effective_products(config, &args.products);
    let pool = acorn_db::connect_from_env().await?;
    let pull_id = Uuid::new_v4();
    let store = PgStore::new(pool, pull_id);
    let adapter = PriceSource::new();

    let report = run_pull(
        &adapter,
        &store,
        forward_windows(start, end, args.granularity, args.record_limit),
        &PullArgs {
            subjects: products,
            granularity_secs: args.granularity,
            pull_id: Some(pull_id),
        },
        &pacing_policy(config, args.max_failures),
    )
    .await?;

    print_report(&report);
    Ok(())
}

// ---------------------------------------------------------------------------
// Trends
// ---------------------------------------------------------------------------

pub struct TrendsArgs {
    pub start: String,
    pub end: String,
    pub set: String,
    pub geo: Option<String>,
    pub with_tags: bool,
    pub step_days: i64,
    pub max_failures: u32,
}

/// Execute `acorn pull trends`: interest-over-time scores pulled
/// reverse-chronologically in overlapping windows, freshest data first.
pub async fn pull_trends(config: &AppConfig, args: TrendsArgs) -> Result<()> {
    let (start, end) = parse_interval(&args.start, &args.end)?;
    if args.step_days <= 0 {
        anyhow::bail!("--step-days must be positive");
    }

    let subjects = trend_subjects(config, &args.set, args.with_tags)?;
    let client = trends_client_from_env()?;
    let adapter = InterestOverTimeSource::new(client, args.geo.clone());

    let pool = acorn_db::connect_from_env().await?;
    let pull_id = Uuid::new_v4();
    let store = PgStore::new(pool, pull_id);

    let report = run_pull(
        &adapter,
        &store,
        // One datapoint of overlap so adjacent windows share a boundary
        // observation; the store dedupes it.
        reverse_windows(start, end, args.step_days * SECS_PER_DAY, SECS_PER_HOUR),
        &PullArgs {
            subjects,
            granularity_secs: SECS_PER_HOUR,
            pull_id: Some(pull_id),
        },
        &pacing_policy(config, args.max_failures),
    )
    .await?;

    print_report(&report);
    Ok(())
}

pub struct RegionsArgs {
    pub start: String,
    pub end: String,
    pub set: String,
    pub geo: Option<String>,
    pub step_days: i64,
    pub max_failures: u32,
}

/// Execute `acorn pull regions`: one interest-by-region aggregate per
/// window (daily by default), reverse-chronologically.
pub async fn pull_regions(config: &AppConfig, args: RegionsArgs) -> Result<()> {
    let (start, end) = parse_interval(&args.start, &args.end)?;
    if args.step_days <= 0 {
        anyhow::bail!("--step-days must be positive");
    }

    let subjects = trend_subjects(config, &args.set, false)?;
    let client = trends_client_from_env()?;
    let adapter = InterestByRegionSource::new(client, args.geo.clone());

    let pool = acorn_db::connect_from_env().await?;
    let pull_id = Uuid::new_v4();
    let store = PgStore::new(pool, pull_id);

    let report = run_pull(
        &adapter,
        &store,
        reverse_windows(start, end, args.step_days * SECS_PER_DAY, 0),
        &PullArgs {
            subjects,
            granularity_secs: SECS_PER_DAY,
            pull_id: Some(pull_id),
        },
        &pacing_policy(config, args.max_failures),
    )
    .await?;

    print_report(&report);
    Ok(())
}

// ---------------------------------------------------------------------------
// Wiring helpers
// ---------------------------------------------------------------------------

fn trends_client_from_env() -> Result<TrendsClient> {
    let base_url = std::env::var(ENV_TRENDS_URL)
        .with_context(|| format!("missing env var {ENV_TRENDS_URL}"))?;
    let (username, password) = acorn_config::resolve_credentials().require_trends()?;
    Ok(TrendsClient::new(base_url, TrendsCredentials { username, password }))
}

/// Runner subjects for a keyword set: the base keyword list, or with
/// `--with-tags` one tagged list per base term.
fn trend_subjects(config: &AppConfig, set_name: &str, with_tags: bool) -> Result<Vec<String>> {
    let set = config.keyword_set(set_name)?;
    if !with_tags {
        return Ok(vec![subject_from_keywords(&set.keywords)]);
    }
    let lists = set.tagged_lists();
    if lists.is_empty() {
        anyhow::bail!("keyword set '{set_name}' has no tags; drop --with-tags");
    }
    Ok(lists.iter().map(|kws| subject_from_keywords(kws)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use acorn_config::load_from_str;

    const SAMPLE: &str = r#"
keyword_sets:
  crypto:
    keywords: [ethereum, bitcoin]
    tags: [price]
  plain:
    keywords: [litecoin]
"#;

    #[test]
    fn base_set_becomes_one_subject() {
        let config = load_from_str(SAMPLE).unwrap();
        let subjects = trend_subjects(&config, "crypto", false).unwrap();
        assert_eq!(subjects, vec!["ethereum|bitcoin".to_string()]);
    }

    #[test]
    fn tag_expansion_yields_one_subject_per_term() {
        let config = load_from_str(SAMPLE).unwrap();
        let subjects = trend_subjects(&config, "crypto", true).unwrap();
        assert_eq!(
            subjects,
            vec!["ethereum price".to_string(), "bitcoin price".to_string()]
        );
    }

    #[test]
    fn with_tags_on_untagged_set_is_an_error() {
        let config = load_from_str(SAMPLE).unwrap();
        assert!(trend_subjects(&config, "plain", true).is_err());
    }

    #[test]
    fn unknown_set_is_an_error() {
        let config = load_from_str(SAMPLE).unwrap();
        assert!(trend_subjects(&config, "nope", false).is_err());
    }
}
