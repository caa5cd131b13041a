//! Exchange candle source adapter.
//!
//! Wraps the exchange's public historic-rates endpoint:
//! `GET {base}/products/{product}/candles?start&end&granularity`, which
//! answers with a JSON array of fixed-length positional records
//! `[epoch_ts, low, high, open, close, volume]`.
//!
//! Response validation is strict: a body that is not an array, a record
//! that is not an array, a wrong field count, or a non-numeric field all
//! fail the request with [`FetchError::MalformedResponse`] before any
//! record is normalized.

use chrono::SecondsFormat;
use serde_json::Value;

use crate::adapter::SourceAdapter;
use crate::error::FetchError;
use crate::QuerySpec;

/// Positional field count of one raw candle record.
const CANDLE_FIELD_COUNT: usize = 6;

/// Default public API base. Override with
/// [`PriceSource::new_with_base_url`] in tests.
const DEFAULT_BASE_URL: &str = "https://api.exchange.coinbase.com";

// ---------------------------------------------------------------------------
// Normalized record
// ---------------------------------------------------------------------------

/// One normalized price candle.
///
/// Natural key: `(product_id, granularity_secs, ts)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleRecord {
    pub product_id: String,
    pub granularity_secs: i64,
    /// Bucket timestamp, UTC epoch seconds.
    pub ts: i64,
    pub low: f64,
    pub high: f64,
    pub open: f64,
    pub close: f64,
    pub volume: f64,
}

impl CandleRecord {
    pub fn natural_key(&self) -> (&str, i64, i64) {
        (&self.product_id, self.granularity_secs, self.ts)
    }
}

// ---------------------------------------------------------------------------
// Source adapter
// ---------------------------------------------------------------------------

/// Price-candle source backed by the exchange's public REST API.
#[derive(Debug, Clone)]
pub struct PriceSource {
    http: reqwest::Client,
    base_url: String,
}

impl PriceSource {
    pub fn new() -> Self {
        Self::new_with_base_url(DEFAULT_BASE_URL.to_string())
    }

    pub fn new_with_base_url(base_url: String) -> Self {
        Self { http: reqwest::Client::new(), base_url }
    }

    fn candles_url(&self, product_id: &str) -> String {
        format!(
            "{}/products/{}/candles",
            self.base_url.trim_end_matches('/'),
            product_id
        )
    }
}

impl Default for PriceSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SourceAdapter for PriceSource {
    type Raw = Value;
    type Record = CandleRecord;

    fn name(&self) -> &'static str {
        "price"
    }

    async fn fetch(&self, spec: &QuerySpec) -> Result<Value, FetchError> {
        let url = self.candles_url(&spec.subject);
        let start = spec.window.start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let end = spec.window.end.to_rfc3339_opts(SecondsFormat::Secs, true);
        let granularity = spec.granularity_secs.to_string();

        let resp = self
            .http
            .get(url)
            .query(&[
                ("start", start.as_str()),
                ("end", end.as_str()),
                ("granularity", granularity.as_str()),
            ])
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

    fn normalize(&self, raw: Value, spec: &QuerySpec) -> Result<Vec<CandleRecord>, FetchError> {
        let rows = raw
            .as_array()
            .ok_or_else(|| FetchError::MalformedResponse("response is not an array".into()))?;

        let mut out = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let fields = row.as_array().ok_or_else(|| {
                FetchError::MalformedResponse(format!("record {i} is not an array"))
            })?;
            if fields.len() != CANDLE_FIELD_COUNT {
                return Err(FetchError::MalformedResponse(format!(
                    "record {i} has {} fields, expected {CANDLE_FIELD_COUNT}",
                    fields.len()
                )));
            }

            let mut nums = [0.0_f64; CANDLE_FIELD_COUNT];
            for (j, field) in fields.iter().enumerate() {
                nums[j] = field.as_f64().ok_or_else(|| {
                    FetchError::MalformedResponse(format!("record {i} field {j} is not numeric"))
                })?;
            }

            out.push(CandleRecord {
                product_id: spec.subject.clone(),
                granularity_secs: spec.granularity_secs,
                ts: nums[0] as i64,
                low: nums[1],
                high: nums[2],
                open: nums[3],
                close: nums[4],
                volume: nums[5],
            });
        }
        Ok(out)
    }
}
