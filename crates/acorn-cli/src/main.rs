use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "acorn")]
#[command(about = "Acorn market/interest data pipelines", long_about = None)]
struct Cli {
    /// Optional YAML config file (products, keyword sets, pacing).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Pull data from a remote source into Postgres
    Pull {
        #[command(subcommand)]
        cmd: PullCmd,
    },

    /// Build feature exports from stored data
    Features {
        #[command(subcommand)]
        cmd: FeaturesCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum PullCmd {
    /// Pull OHLCV candles from the exchange, forward-chronologically.
    Prices {
        /// Interval start (RFC3339 or YYYY-MM-DD, UTC)
        #[arg(long)]
        start: String,

        /// Interval end (RFC3339 or YYYY-MM-DD, UTC)
        #[arg(long)]
        end: String,

        /// Candle granularity in seconds
        #[arg(long, default_value_t = 3600)]
        granularity: i64,

        /// Products to pull; defaults to the configured product list
        #[arg(long = "product")]
        products: Vec<String>,

        /// Max candles the API returns per request
        #[arg(long, default_value_t = 200)]
        record_limit: i64,

        /// Retryable-failure budget for the whole run
        #[arg(long, default_value_t = 10)]
        max_failures: u32,
    },

    /// Pull interest-over-time scores, reverse-chronologically.
    Trends {
        /// Interval start (RFC3339 or YYYY-MM-DD, UTC)
        #[arg(long)]
        start: String,

        /// Interval end (RFC3339 or YYYY-MM-DD, UTC)
        #[arg(long)]
        end: String,

        /// Named keyword set from the config file
        #[arg(long)]
        set: String,

        /// Region restriction (e.g. US); worldwide when absent
        #[arg(long)]
        geo: Option<String>,

        /// Expand the set's tags into one query per base term
        #[arg(long, default_value_t = false)]
        with_tags: bool,

        /// Window size in days
        #[arg(long, default_value_t = 7)]
        step_days: i64,

        /// Retryable-failure budget for the whole run
        #[arg(long, default_value_t = 10)]
        max_failures: u32,
    },

    /// Pull interest-by-region aggregates, one window per day.
    Regions {
        /// Interval start (RFC3339 or YYYY-MM-DD, UTC)
        #[arg(long)]
        start: String,

        /// Interval end (RFC3339 or YYYY-MM-DD, UTC)
        #[arg(long)]
        end: String,

        /// Named keyword set from the config file
        #[arg(long)]
        set: String,

        /// Region restriction; worldwide when absent
        #[arg(long)]
        geo: Option<String>,

        /// Window size in days
        #[arg(long, default_value_t = 1)]
        step_days: i64,

        /// Retryable-failure budget for the whole run
        #[arg(long, default_value_t = 10)]
        max_failures: u32,
    },
}

#[derive(Subcommand)]
enum FeaturesCmd {
    /// Export stored close/volume series as a gap-explicit aligned CSV.
    Prices {
        /// Interval start (RFC3339 or YYYY-MM-DD, UTC)
        #[arg(long)]
        start: String,

        /// Interval end (RFC3339 or YYYY-MM-DD, UTC)
        #[arg(long)]
        end: String,

        /// Candle granularity in seconds
        #[arg(long, default_value_t = 3600)]
        granularity: i64,

        /// Products to export; defaults to the configured product list
        #[arg(long = "product")]
        products: Vec<String>,

        /// Output CSV path; stdout when absent
        #[arg(long)]
        out: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = acorn_config::load_or_default(cli.config.as_deref().map(std::path::Path::new))?;
    tracing::info!(config_hash = %config.config_hash, "config loaded");

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = acorn_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = acorn_db::status(&pool).await?;
                    println!("db_ok={} has_candles_table={}", s.ok, s.has_candles_table);
                }
                DbCmd::Migrate => {
                    acorn_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::Pull { cmd } => match cmd {
            PullCmd::Prices {
                start,
                end,
                granularity,
                products,
                record_limit,
                max_failures,
            } => {
                commands::pull::pull_prices(
                    &config,
                    commands::pull::PricesArgs {
                        start,
                        end,
                        granularity,
                        products,
                        record_limit,
                        max_failures,
                    },
                )
                .await?;
            }

            PullCmd::Trends {
                start,
                end,
                set,
                geo,
                with_tags,
                step_days,
                max_failures,
            } => {
                commands::pull::pull_trends(
                    &config,
                    commands::pull::TrendsArgs {
                        start,
                        end,
                        set,
                        geo,
                        with_tags,
                        step_days,
                        max_failures,
                    },
                )
                .await?;
            }

            PullCmd::Regions { start, end, set, geo, step_days, max_failures } => {
                commands::pull::pull_regions(
                    &config,
                    commands::pull::RegionsArgs { start, end, set, geo, step_days, max_failures },
                )
                .await?;
            }
        },

        Commands::Features { cmd } => match cmd {
            FeaturesCmd::Prices { start, end, granularity, products, out } => {
                commands::features::features_prices(
                    &config,
                    commands::features::PricesExportArgs { start, end, granularity, products, out },
                )
                .await?;
            }
        },
    }

    Ok(())
}
