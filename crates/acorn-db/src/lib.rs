//! acorn-db
//!
//! Postgres persistence for the pull pipelines: embedded migrations,
//! insert-if-absent stores implementing `acorn_ingest::adapter::
//! RecordStore` for each record type, and the read API used by the
//! feature aligner.
//!
//! All writes go through natural-key upserts (`on conflict do nothing`);
//! an existing row is never updated.

use anyhow::{anyhow, Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use acorn_ingest::adapter::RecordStore;
use acorn_ingest::error::StoreError;
use acorn_ingest::price::CandleRecord;
use acorn_ingest::trends::{InterestByRegionRecord, InterestOverTimeRecord};

pub const ENV_DB_URL: &str = "ACORN_DATABASE_URL";

/// Connect to Postgres using ACORN_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url =
        std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_candles_table: bool,
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='candles'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus { ok: one == 1, has_candles_table: exists })
}

// ---------------------------------------------------------------------------
// Insert-if-absent store
// ---------------------------------------------------------------------------

/// Postgres-backed store. One instance per pull; rows it creates carry
/// `pull_id` for attribution.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    pull_id: Uuid,
}

impl PgStore {
    pub fn new(pool: PgPool, pull_id: Uuid) -> Self {
        Self { pool, pull_id }
    }

    pub fn pull_id(&self) -> Uuid {
        self.pull_id
    }
}

fn store_err(e: sqlx::Error, what: &str) -> StoreError {
    StoreError(format!("{what}: {e}"))
}

#[async_trait::async_trait]
impl RecordStore<CandleRecord> for PgStore {
    async fn upsert(&self, record: &CandleRecord) -> Result<bool, StoreError> {
        let res = sqlx::query(
            r#"
            insert into candles
              (product_id, granularity_secs, ts, low, high, open, close, volume, pull_id)
            values
              ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            on conflict (product_id, granularity_secs, ts) do nothing
            "#,
        )
        .bind(&record.product_id)
        .bind(record.granularity_secs)
        .bind(record.ts)
        .bind(record.low)
        .bind(record.high)
        .bind(record.open)
        .bind(record.close)
        .bind(record.volume)
        .bind(self.pull_id)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err(e, "upsert candles failed"))?;

        Ok(res.rows_affected() == 1)
    }
}

#[async_trait::async_trait]
impl RecordStore<InterestOverTimeRecord> for PgStore {
    async fn upsert(&self, record: &InterestOverTimeRecord) -> Result<bool, StoreError> {
        let scores = serde_json::to_value(&record.scores)
            .map_err(|e| StoreError(format!("serialize scores failed: {e}")))?;

        let res = sqlx::query(
            r#"
            insert into interest_over_time
              (geo, search_terms, ts, window_start, window_end, scores, pull_id)
            values
              ($1,$2,$3,$4,$5,$6,$7)
            on conflict (geo, search_terms, ts) do nothing
            "#,
        )
        .bind(&record.geo)
        .bind(&record.search_terms)
        .bind(record.ts)
        .bind(record.window_start)
        .bind(record.window_end)
        .bind(scores)
        .bind(self.pull_id)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err(e, "upsert interest_over_time failed"))?;

        Ok(res.rows_affected() == 1)
    }
}

#[async_trait::async_trait]
impl RecordStore<InterestByRegionRecord> for PgStore {
    async fn upsert(&self, record: &InterestByRegionRecord) -> Result<bool, StoreError> {
        let scores = serde_json::to_value(&record.scores)
            .map_err(|e| StoreError(format!("serialize scores failed: {e}")))?;

        let res = sqlx::query(
            r#"
            insert into interest_by_region
              (geo, search_terms, window_start, window_end, scores, pull_id)
            values
              ($1,$2,$3,$4,$5,$6)
            on conflict (geo, search_terms, window_start, window_end) do nothing
            "#,
        )
        .bind(&record.geo)
        .bind(&record.search_terms)
        .bind(record.window_start)
        .bind(record.window_end)
        .bind(scores)
        .bind(self.pull_id)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err(e, "upsert interest_by_region failed"))?;

        Ok(res.rows_affected() == 1)
    }
}

// ---------------------------------------------------------------------------
// Read API (feature building)
// ---------------------------------------------------------------------------

/// One stored close/volume observation, as consumed by the aligner.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseVolumeRow {
    pub product_id: String,
    pub ts: i64,
    pub close: f64,
    pub volume: f64,
}

/// Load close/volume series for the given products and granularity over
/// `[start_ts, end_ts]`, in stable `(product_id, ts)` order.
pub async fn load_close_volume(
    pool: &PgPool,
    products: &[String],
    granularity_secs: i64,
    start_ts: i64,
    end_ts: i64,
) -> Result<Vec<CloseVolumeRow>> {
    if products.is_empty() {
        return Err(anyhow!("products must be non-empty"));
    }
    if start_ts > end_ts {
        return Err(anyhow!("start_ts must be <= end_ts"));
    }

    let rows = sqlx::query(
        r#"
        select product_id, ts, close, volume
        from candles
        where granularity_secs = $1
          and product_id = any($2)
          and ts >= $3
          and ts <= $4
        order by product_id asc, ts asc
        "#,
    )
    .bind(granularity_secs)
    .bind(products)
    .bind(start_ts)
    .bind(end_ts)
    .fetch_all(pool)
    .await
    .context("load_close_volume query failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for r in rows {
        out.push(CloseVolumeRow {
            product_id: r.try_get::<String, _>("product_id").context("candles.product_id")?,
            ts: r.try_get::<i64, _>("ts").context("candles.ts")?,
            close: r.try_get::<f64, _>("close").context("candles.close")?,
            volume: r.try_get::<f64, _>("volume").context("candles.volume")?,
        });
    }
    Ok(out)
}
