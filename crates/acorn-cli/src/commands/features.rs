//! Feature export command handlers.
//!
//! Reads stored candles, pivots them into one `_close`/`_volume` column
//! pair per product on a shared time grid, and writes gap-explicit CSV.
//! A timestamp with no stored candle yields empty cells, never an
//! interpolated value.

use std::collections::BTreeMap;
use std::fs::File;
use std::io;

use anyhow::{Context, Result};

use acorn_config::AppConfig;
use acorn_db::CloseVolumeRow;
use acorn_ingest::align::AlignedFrame;

use super::{effective_products, parse_interval};

pub struct PricesExportArgs {
    pub start: String,
    pub end: String,
    pub granularity: i64,
    pub products: Vec<String>,
    pub out: Option<String>,
}

/// Execute `acorn features prices`.
pub async fn features_prices(config: &AppConfig, args: PricesExportArgs) -> Result<()> {
    let (start, end) = parse_interval(&args.start, &args.end)?;
    if args.granularity <= 0 {
        anyhow::bail!("--granularity must be positive");
    }
    let (start_ts, end_ts) = (start.timestamp(), end.timestamp());

    let products = effective_products(config, &args.products);
    let pool = acorn_db::connect_from_env().await?;
    let rows =
        acorn_db::load_close_volume(&pool, &products, args.granularity, start_ts, end_ts).await?;

    let frame = pivot_close_volume(&rows, &products, start_ts, end_ts, args.granularity);

    match &args.out {
        Some(path) => {
            let file =
                File::create(path).with_context(|| format!("create output failed: {path}"))?;
            frame.write_csv(file)?;
            println!("features_ok=true rows={} path={}", frame.n_rows(), path);
        }
        None => {
            frame.write_csv(io::stdout().lock())?;
        }
    }
    Ok(())
}

/// Pivot stored rows into per-product close/volume columns on the grid.
/// Products with no rows still get (all-empty) columns, so the output
/// shape is determined by the request rather than by coverage.
fn pivot_close_volume(
    rows: &[CloseVolumeRow],
    products: &[String],
    start_ts: i64,
    end_ts: i64,
    step_secs: i64,
) -> AlignedFrame {
    let mut closes: BTreeMap<&str, BTreeMap<i64, f64>> = BTreeMap::new();
    let mut volumes: BTreeMap<&str, BTreeMap<i64, f64>> = BTreeMap::new();
    for row in rows {
        closes.entry(&row.product_id).or_default().insert(row.ts, row.close);
        volumes.entry(&row.product_id).or_default().insert(row.ts, row.volume);
    }

    let empty = BTreeMap::new();
    let mut frame = AlignedFrame::new(start_ts, end_ts, step_secs);
    for product in products {
        let c = closes.get(product.as_str()).unwrap_or(&empty);
        let v = volumes.get(product.as_str()).unwrap_or(&empty);
        frame.insert_series(&format!("{product}_close"), c);
        frame.insert_series(&format!("{product}_volume"), v);
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(product: &str, ts: i64, close: f64, volume: f64) -> CloseVolumeRow {
        CloseVolumeRow { product_id: product.to_string(), ts, close, volume }
    }

    #[test]
    fn pivots_each_product_into_close_and_volume_columns() {
        let products = vec!["BTC-USD".to_string(), "ETH-USD".to_string()];
        let rows = vec![
            row("BTC-USD", 0, 100.0, 1.5),
            row("BTC-USD", 7200, 104.0, 2.0),
            row("ETH-USD", 3600, 900.0, 7.0),
        ];

        let frame = pivot_close_volume(&rows, &products, 0, 7200, 3600);
        assert_eq!(frame.timestamps(), &[0, 3600, 7200]);
        assert_eq!(
            frame.column_names().collect::<Vec<_>>(),
            vec!["BTC-USD_close", "BTC-USD_volume", "ETH-USD_close", "ETH-USD_volume"]
        );

        // Gap at 3600 for BTC stays empty, not interpolated.
        assert_eq!(frame.column("BTC-USD_close").unwrap(), &[Some(100.0), None, Some(104.0)]);
        assert_eq!(frame.column("ETH-USD_volume").unwrap(), &[None, Some(7.0), None]);
    }

    #[test]
    fn product_without_rows_gets_empty_columns() {
        let products = vec!["BTC-USD".to_string()];
        let frame = pivot_close_volume(&[], &products, 0, 3600, 3600);
        assert_eq!(frame.column("BTC-USD_close").unwrap(), &[None, None]);
    }
}
