//! Search-interest source adapters.
//!
//! Wraps the trends API's two read-only endpoints:
//! - `GET {base}/interest_over_time`: wide table of per-keyword scores
//!   indexed by timestamp.
//! - `GET {base}/interest_by_region`: wide table of per-keyword scores
//!   indexed by region code.
//!
//! Both requests carry the keyword list, an optional geo restriction and
//! an hour-resolution `"<ISO hour> <ISO hour>"` timeframe built from the
//! fetch window. Responses are validated as wide tables: every row must
//! carry exactly one score per keyword.
//!
//! The runner's `subject` string is an encoded keyword list (see
//! [`subject_from_keywords`]); one pull can interleave several keyword
//! lists per window, which is how tag expansion works.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::adapter::SourceAdapter;
use crate::error::FetchError;
use crate::{QuerySpec, TimeWindow};

/// Separator for keyword lists packed into a `QuerySpec::subject`.
const SUBJECT_SEPARATOR: char = '|';

/// Hour-resolution timestamp format used by the trends API.
const ISO_HOURLY: &str = "%Y-%m-%dT%H";

/// Pack a keyword list into a runner subject string.
pub fn subject_from_keywords<S: AsRef<str>>(keywords: &[S]) -> String {
    keywords
        .iter()
        .map(|k| k.as_ref().trim())
        .filter(|k| !k.is_empty())
        .collect::<Vec<_>>()
        .join(&SUBJECT_SEPARATOR.to_string())
}

fn keywords_from_subject(subject: &str) -> Result<Vec<String>, FetchError> {
    let kws: Vec<String> = subject
        .split(SUBJECT_SEPARATOR)
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();
    if kws.is_empty() {
        return Err(FetchError::MalformedResponse(format!(
            "subject '{subject}' encodes no keywords"
        )));
    }
    Ok(kws)
}

/// Derived deduplication string: the query's keywords, sorted and joined.
/// Part of the natural key of both trend record types, so the same
/// keyword list always dedupes to the same rows regardless of order.
fn search_terms(keywords: &[String]) -> String {
    let mut sorted: Vec<&str> = keywords.iter().map(|k| k.as_str()).collect();
    sorted.sort_unstable();
    sorted.join(", ")
}

fn timeframe(window: &TimeWindow) -> String {
    format!(
        "{} {}",
        window.start.format(ISO_HOURLY),
        window.end.format(ISO_HOURLY)
    )
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Trends API credentials, resolved from the environment at startup.
/// **Values are redacted in `Debug` output.**
#[derive(Clone)]
pub struct TrendsCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for TrendsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrendsCredentials")
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Shared client
// ---------------------------------------------------------------------------

/// HTTP client shared by both trends adapters.
#[derive(Debug, Clone)]
pub struct TrendsClient {
    http: reqwest::Client,
    base_url: String,
    credentials: TrendsCredentials,
}

impl TrendsClient {
    pub fn new(base_url: String, credentials: TrendsCredentials) -> Self {
        Self { http: reqwest::Client::new(), base_url, credentials }
    }

    async fn get_wide_table(
        &self,
        endpoint: &str,
        keywords: &[String],
        geo: Option<&str>,
        window: &TimeWindow,
    ) -> Result<Value, FetchError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), endpoint);
        let kw_param = keywords.join(",");
        let tf = timeframe(window);

        let mut query: Vec<(&str, &str)> =
            vec![("keywords", kw_param.as_str()), ("timeframe", tf.as_str())];
        if let Some(g) = geo {
            query.push(("geo", g));
        }

        let resp = self
            .http
            .get(url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .query(&query)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(FetchError::Api { status: status.as_u16(), message });
        }

        resp.json::<Value>()
            .await
            .map_err(|e| FetchError::MalformedResponse(format!("body is not JSON: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Wide-table payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct InterestOverTimePayload {
    keywords: Vec<String>,
    /// `[epoch_ts, score_kw1, score_kw2, ...]` per row.
    points: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct InterestByRegionPayload {
    keywords: Vec<String>,
    /// `[region_code, score_kw1, score_kw2, ...]` per row.
    rows: Vec<Vec<Value>>,
}

/// Zip one wide-table row's score cells against the keyword header,
/// skipping the leading index cell.
fn scores_for_row(
    keywords: &[String],
    row: &[Value],
    row_idx: usize,
) -> Result<BTreeMap<String, i64>, FetchError> {
    if row.len() != keywords.len() + 1 {
        return Err(FetchError::MalformedResponse(format!(
            "row {row_idx} has {} cells, expected {} (one per keyword plus index)",
            row.len(),
            keywords.len() + 1
        )));
    }
    let mut scores = BTreeMap::new();
    for (kw, cell) in keywords.iter().zip(row.iter().skip(1)) {
        let v = cell.as_i64().ok_or_else(|| {
            FetchError::MalformedResponse(format!(
                "row {row_idx} score for '{kw}' is not an integer"
            ))
        })?;
        scores.insert(kw.clone(), v);
    }
    Ok(scores)
}

// ---------------------------------------------------------------------------
// Normalized records
// ---------------------------------------------------------------------------

/// One interest-over-time observation.
///
/// Natural key: `(geo, search_terms, ts)`. The fetch window bounds are
/// payload, not key: overlapping reverse windows re-deliver boundary
/// observations and the key makes that re-delivery a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterestOverTimeRecord {
    /// Region restriction of the query; `""` means worldwide.
    pub geo: String,
    pub search_terms: String,
    /// Observation timestamp, UTC epoch seconds.
    pub ts: i64,
    pub window_start: i64,
    pub window_end: i64,
    /// Keyword -> relative score (0..=100).
    pub scores: BTreeMap<String, i64>,
}

/// One interest-by-region aggregate for a fetch window.
///
/// Natural key: `(geo, search_terms, window_start, window_end)`; the
/// row is an aggregate over the whole window, so the bounds stay in the
/// key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterestByRegionRecord {
    pub geo: String,
    pub search_terms: String,
    pub window_start: i64,
    pub window_end: i64,
    pub scores: BTreeMap<String, i64>,
}

// ---------------------------------------------------------------------------
// Adapters
// ---------------------------------------------------------------------------

/// Interest-over-time source adapter.
#[derive(Debug, Clone)]
pub struct InterestOverTimeSource {
    client: TrendsClient,
    geo: Option<String>,
}

impl InterestOverTimeSource {
    pub fn new(client: TrendsClient, geo: Option<String>) -> Self {
        Self { client, geo }
    }
}

#[async_trait::async_trait]
impl SourceAdapter for InterestOverTimeSource {
    type Raw = Value;
    type Record = InterestOverTimeRecord;

    fn name(&self) -> &'static str {
        "interest_over_time"
    }

    async fn fetch(&self, spec: &QuerySpec) -> Result<Value, FetchError> {
        let keywords = keywords_from_subject(&spec.subject)?;
        self.client
            .get_wide_table("interest_over_time", &keywords, self.geo.as_deref(), &spec.window)
            .await
    }

    fn normalize(
        &self,
        raw: Value,
        spec: &QuerySpec,
    ) -> Result<Vec<InterestOverTimeRecord>, FetchError> {
        let payload: InterestOverTimePayload = serde_json::from_value(raw)
            .map_err(|e| FetchError::MalformedResponse(format!("not a wide table: {e}")))?;
        let terms = search_terms(&payload.keywords);
        let geo = self.geo.clone().unwrap_or_default();

        let mut out = Vec::with_capacity(payload.points.len());
        for (i, row) in payload.points.iter().enumerate() {
            let scores = scores_for_row(&payload.keywords, row, i)?;
            let ts = row[0].as_i64().ok_or_else(|| {
                FetchError::MalformedResponse(format!("row {i} index is not an epoch timestamp"))
            })?;
            out.push(InterestOverTimeRecord {
                geo: geo.clone(),
                search_terms: terms.clone(),
                ts,
                window_start: spec.window.start.timestamp(),
                window_end: spec.window.end.timestamp(),
                scores,
            });
        }
        Ok(out)
    }
}

/// Interest-by-region source adapter.
#[derive(Debug, Clone)]
pub struct InterestByRegionSource {
    client: TrendsClient,
    geo: Option<String>,
}

impl InterestByRegionSource {
    pub fn new(client: TrendsClient, geo: Option<String>) -> Self {
        Self { client, geo }
    }
}

#[async_trait::async_trait]
impl SourceAdapter for InterestByRegionSource {
    type Raw = Value;
    type Record = InterestByRegionRecord;

    fn name(&self) -> &'static str {
        "interest_by_region"
    }

    async fn fetch(&self, spec: &QuerySpec) -> Result<Value, FetchError> {
        let keywords = keywords_from_subject(&spec.subject)?;
        self.client
            .get_wide_table("interest_by_region", &keywords, self.geo.as_deref(), &spec.window)
            .await
    }

    fn normalize(
        &self,
        raw: Value,
        spec: &QuerySpec,
    ) -> Result<Vec<InterestByRegionRecord>, FetchError> {
        let payload: InterestByRegionPayload = serde_json::from_value(raw)
            .map_err(|e| FetchError::MalformedResponse(format!("not a wide table: {e}")))?;
        let terms = search_terms(&payload.keywords);

        let mut out = Vec::with_capacity(payload.rows.len());
        for (i, row) in payload.rows.iter().enumerate() {
            let scores = scores_for_row(&payload.keywords, row, i)?;
            let region = row[0].as_str().ok_or_else(|| {
                FetchError::MalformedResponse(format!("row {i} index is not a region code"))
            })?;
            out.push(InterestByRegionRecord {
                geo: region.to_string(),
                search_terms: terms.clone(),
                window_start: spec.window.start.timestamp(),
                window_end: spec.window.end.timestamp(),
                scores,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use httpmock::prelude::*;
    use serde_json::json;

    fn creds() -> TrendsCredentials {
        TrendsCredentials { username: "squirrel".into(), password: "hunter2".into() }
    }

    fn spec(subject: &str) -> QuerySpec {
        QuerySpec {
            subject: subject.to_string(),
            granularity_secs: 3600,
            window: TimeWindow {
                start: Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap(),
                end: Utc.with_ymd_and_hms(2018, 1, 8, 0, 0, 0).unwrap(),
            },
        }
    }

    #[test]
    fn subject_round_trip() {
        let subject = subject_from_keywords(&["bitcoin", "ethereum price"]);
        assert_eq!(subject, "bitcoin|ethereum price");
        assert_eq!(
            keywords_from_subject(&subject).unwrap(),
            vec!["bitcoin".to_string(), "ethereum price".to_string()]
        );
    }

    #[test]
    fn empty_subject_is_rejected() {
        assert!(keywords_from_subject("  |  ").is_err());
    }

    #[test]
    fn search_terms_are_sorted() {
        let kws = vec!["litecoin".to_string(), "bitcoin".to_string()];
        assert_eq!(search_terms(&kws), "bitcoin, litecoin");
    }

    #[test]
    fn timeframe_is_hour_resolution() {
        let w = TimeWindow {
            start: Utc.with_ymd_and_hms(2018, 1, 1, 6, 45, 12).unwrap(),
            end: Utc.with_ymd_and_hms(2018, 1, 8, 6, 0, 0).unwrap(),
        };
        assert_eq!(timeframe(&w), "2018-01-01T06 2018-01-08T06");
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let dbg = format!("{:?}", creds());
        assert!(dbg.contains("squirrel"));
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn normalize_interest_over_time() {
        let client = TrendsClient::new("http://unused".into(), creds());
        let src = InterestOverTimeSource::new(client, Some("US".into()));
        let raw = json!({
            "keywords": ["bitcoin", "litecoin"],
            "points": [
                [1514764800, 97, 12],
                [1514768400, 88, 10]
            ]
        });

        let recs = src.normalize(raw, &spec("litecoin|bitcoin")).unwrap();
        assert_eq!(recs.len(), 2);
        let r = &recs[0];
        assert_eq!(r.geo, "US");
        assert_eq!(r.search_terms, "bitcoin, litecoin");
        assert_eq!(r.ts, 1_514_764_800);
        assert_eq!(r.window_start, 1_514_764_800);
        assert_eq!(r.scores["bitcoin"], 97);
        assert_eq!(r.scores["litecoin"], 12);
    }

    #[test]
    fn normalize_rejects_score_count_mismatch() {
        let client = TrendsClient::new("http://unused".into(), creds());
        let src = InterestOverTimeSource::new(client, None);
        let raw = json!({
            "keywords": ["bitcoin", "litecoin"],
            "points": [[1514764800, 97]]
        });
        let err = src.normalize(raw, &spec("bitcoin|litecoin")).unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse(_)));
    }

    #[test]
    fn normalize_interest_by_region() {
        let client = TrendsClient::new("http://unused".into(), creds());
        let src = InterestByRegionSource::new(client, None);
        let raw = json!({
            "keywords": ["bitcoin"],
            "rows": [["US", 64], ["KR", 100]]
        });

        let recs = src.normalize(raw, &spec("bitcoin")).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].geo, "US");
        assert_eq!(recs[1].geo, "KR");
        assert_eq!(recs[1].scores["bitcoin"], 100);
        assert_eq!(recs[0].window_end, 1_515_369_600);
    }

    #[test]
    fn normalize_rejects_non_table_body() {
        let client = TrendsClient::new("http://unused".into(), creds());
        let src = InterestByRegionSource::new(client, None);
        let err = src.normalize(json!([1, 2, 3]), &spec("bitcoin")).unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn fetch_sends_keywords_geo_and_timeframe() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/interest_over_time")
                .query_param("keywords", "bitcoin,litecoin")
                .query_param("geo", "US")
                .query_param("timeframe", "2018-01-01T00 2018-01-08T00");
            then.status(200).json_body(json!({
                "keywords": ["bitcoin", "litecoin"],
                "points": [[1514764800, 97, 12]]
            }));
        });

        let client = TrendsClient::new(server.base_url(), creds());
        let src = InterestOverTimeSource::new(client, Some("US".into()));
        let s = spec("bitcoin|litecoin");
        let raw = src.fetch(&s).await.unwrap();
        let recs = src.normalize(raw, &s).unwrap();

        mock.assert();
        assert_eq!(recs.len(), 1);
    }

    #[tokio::test]
    async fn fetch_maps_auth_failure_to_api_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/interest_by_region");
            then.status(401).body("bad credentials");
        });

        let client = TrendsClient::new(server.base_url(), creds());
        let src = InterestByRegionSource::new(client, None);
        let err = src.fetch(&spec("bitcoin")).await.unwrap_err();
        assert_eq!(err, FetchError::Api { status: 401, message: "bad credentials".into() });
    }
}
