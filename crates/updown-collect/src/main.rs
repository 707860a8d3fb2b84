//! updown-collect: data collection CLI for daily up/down markets.
//!
//! # Usage
//!
//! Run the snapshot loop:
//! ```sh
//! updown-collect snapshot --interval 60
//! ```
//!
//! Backfill a month of spot candles:
//! ```sh
//! updown-collect candles --asset btc --start 2025-03-01 --end 2025-03-31
//! ```
//!
//! Download odds histories and resample them:
//! ```sh
//! updown-collect odds --asset btc
//! updown-collect resample --step 60 --fill ffill
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use updown_collect::candles::{recent_candles, CandleBackfiller, CandleSource, CoinbaseClient};
use updown_collect::config::CollectConfig;
use updown_collect::csv_out::{read_candles_csv, write_csv};
use updown_collect::features::align;
use updown_collect::ndjson::{read_records, NdjsonWriter};
use updown_collect::odds_history::{HistoryFile, OddsHistoryFetcher};
use updown_collect::recorder::{record_books_once, run_trade_poll, RecorderConfig};
use updown_collect::resample::resample;
use updown_collect::snapshot::{export_daily, run_snapshot_loop, SnapshotConfig};
use updown_common::{MarketInstance, OddsSnapshot, RateGate, SeriesAsset};
use updown_market::{
    hydrate_series, resolve_current, ClobClient, ClobSource, EventSource, GammaClient,
};

/// Odds and spot data collector for daily up/down markets.
#[derive(Parser, Debug)]
#[command(name = "updown-collect")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config/collect.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Base directory for output files
    #[arg(long, env = "UPDOWN_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture odds snapshots for the configured series on an interval
    Snapshot {
        /// Seconds between ticks
        #[arg(long)]
        interval: Option<u64>,

        /// Ticks before exiting (0 = run until shutdown)
        #[arg(long)]
        iterations: Option<u64>,

        /// Output NDJSON path
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Flatten a snapshot log into a per-asset CSV
    Export {
        /// Asset to export (btc, eth)
        #[arg(long, short, default_value = "btc")]
        asset: String,

        /// Snapshot NDJSON path
        #[arg(long)]
        snapshots: Option<PathBuf>,

        /// Output CSV path
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Backfill spot candles from Coinbase
    Candles {
        /// Asset (btc, eth)
        #[arg(long, short, default_value = "btc")]
        asset: String,

        /// Start date (YYYY-MM-DD)
        #[arg(long, short = 's')]
        start: Option<String>,

        /// End date (YYYY-MM-DD, inclusive)
        #[arg(long, short = 'e')]
        end: Option<String>,

        /// Fetch only the most recent N bars instead of a date range
        #[arg(long)]
        recent: Option<usize>,

        /// Bar length in seconds
        #[arg(long)]
        granularity: Option<u32>,

        /// Output CSV path
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Download full odds history files for a series
    Odds {
        /// Asset (btc, eth)
        #[arg(long, short, default_value = "btc")]
        asset: String,

        /// Only fetch the currently active market
        #[arg(long)]
        current: bool,

        /// Fetch one market by slug instead of resolving the series
        #[arg(long)]
        slug: Option<String>,

        /// Output directory for history JSON files
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Resample downloaded odds histories onto a fixed grid
    Resample {
        /// Directory of history JSON files
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Grid step in seconds
        #[arg(long)]
        step: Option<i64>,

        /// Fill policy (ffill, linear)
        #[arg(long)]
        fill: Option<String>,

        /// Output directory for resampled CSVs
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Join odds snapshots to spot candles into a feature table
    Features {
        /// Asset (btc, eth)
        #[arg(long, short, default_value = "btc")]
        asset: String,

        /// Snapshot NDJSON path
        #[arg(long)]
        snapshots: Option<PathBuf>,

        /// Candle CSV path
        #[arg(long)]
        candles: Option<PathBuf>,

        /// Bar length in seconds for the join
        #[arg(long)]
        bar: Option<i64>,

        /// Output CSV path
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Poll recent trades for the current market
    Trades {
        /// Asset (btc, eth)
        #[arg(long, short, default_value = "btc")]
        asset: String,

        /// Trades requested per token per poll
        #[arg(long)]
        limit: Option<u32>,

        /// Seconds between polls
        #[arg(long)]
        interval: Option<u64>,

        /// Polls before exiting (0 = run until shutdown)
        #[arg(long)]
        iterations: Option<u64>,

        /// Output NDJSON path
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Capture one order book snapshot per token of the current market
    Books {
        /// Asset (btc, eth)
        #[arg(long, short, default_value = "btc")]
        asset: String,

        /// Output NDJSON path
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

/// Parse a date string in YYYY-MM-DD format to UTC datetime (start of day).
fn parse_date(date_str: &str) -> Result<chrono::DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .with_context(|| format!("Invalid date: {}. Expected YYYY-MM-DD", date_str))?;
    let datetime = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow::anyhow!("Failed to build datetime from {}", date_str))?;
    Ok(Utc.from_utc_datetime(&datetime))
}

/// Parse a date string in YYYY-MM-DD format to UTC datetime (end of day).
fn parse_date_end_of_day(date_str: &str) -> Result<chrono::DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .with_context(|| format!("Invalid date: {}. Expected YYYY-MM-DD", date_str))?;
    let datetime = date
        .and_hms_opt(23, 59, 59)
        .ok_or_else(|| anyhow::anyhow!("Failed to build datetime from {}", date_str))?;
    Ok(Utc.from_utc_datetime(&datetime))
}

fn parse_asset(s: &str) -> Result<SeriesAsset> {
    s.parse().map_err(|e: String| anyhow::anyhow!(e))
}

/// Blocks until SIGTERM or SIGINT (Ctrl+C on non-unix platforms).
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let sigterm = signal(SignalKind::terminate());
        let sigint = signal(SignalKind::interrupt());
        match (sigterm, sigint) {
            (Ok(mut term), Ok(mut int)) => {
                tokio::select! {
                    _ = term.recv() => info!("Received SIGTERM"),
                    _ = int.recv() => info!("Received SIGINT"),
                }
            }
            _ => {
                error!("Failed to register signal handlers");
                std::future::pending::<()>().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C");
        } else {
            error!("Failed to register Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    }
}

/// Resolves the currently active daily market for one asset.
async fn current_instance(config: &CollectConfig, asset: SeriesAsset) -> Result<MarketInstance> {
    let gate = Arc::new(RateGate::new(config.gamma_call_delay));
    let gamma = GammaClient::new(config.gamma.clone(), gate)?;
    let events = hydrate_series(&gamma, asset.gamma_series_id()).await?;
    let instances: Vec<MarketInstance> = events.iter().filter_map(|e| e.instance()).collect();

    let current = resolve_current(&instances, Utc::now())?;
    info!(
        "Current {} market: {} (ends {})",
        asset, current.slug, current.end_time
    );
    Ok(current.clone())
}

async fn run_snapshot(
    config: &CollectConfig,
    interval: Option<u64>,
    iterations: Option<u64>,
    out: Option<PathBuf>,
) -> Result<u64> {
    let gate = Arc::new(RateGate::new(config.gamma_call_delay));
    let source: Arc<dyn EventSource> = Arc::new(GammaClient::new(config.gamma.clone(), gate)?);
    let path = out.unwrap_or_else(|| config.data_dir.join("odds_snapshots.ndjson"));
    let writer = Arc::new(NdjsonWriter::new(path));

    let snap_config = SnapshotConfig {
        interval: interval
            .map(StdDuration::from_secs)
            .unwrap_or(config.snapshot_interval),
        iterations: iterations.unwrap_or(config.snapshot_iterations),
        assets: config.assets.clone(),
    };

    let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
    let loop_writer = Arc::clone(&writer);
    let mut handle = tokio::spawn(async move {
        run_snapshot_loop(source, loop_writer, &snap_config, shutdown_rx).await
    });

    let stats = tokio::select! {
        result = &mut handle => result??,
        _ = wait_for_shutdown() => {
            let _ = shutdown_tx.send(());
            handle.await??
        }
    };

    info!("Snapshot run complete: {}", stats);
    Ok(stats.rows_written)
}

fn run_export(
    config: &CollectConfig,
    asset: &str,
    snapshots: Option<PathBuf>,
    out: Option<PathBuf>,
) -> Result<u64> {
    let asset = parse_asset(asset)?;
    let snap_path = snapshots.unwrap_or_else(|| config.data_dir.join("odds_snapshots.ndjson"));
    let out_path = out.unwrap_or_else(|| config.data_dir.join(format!("{}_daily.csv", asset)));

    let written = export_daily(&snap_path, asset, &out_path)?;
    Ok(written as u64)
}

#[allow(clippy::too_many_arguments)]
async fn run_candles(
    config: &CollectConfig,
    asset: &str,
    start: Option<String>,
    end: Option<String>,
    recent: Option<usize>,
    granularity: Option<u32>,
    out: Option<PathBuf>,
) -> Result<u64> {
    let asset = parse_asset(asset)?;
    let product = asset.spot_product();
    let granularity = granularity.unwrap_or(config.granularity_secs);

    let gate = Arc::new(RateGate::new(config.coinbase_call_delay));
    let client = Arc::new(CoinbaseClient::new(config.coinbase.clone(), gate)?);

    let candles = match recent {
        Some(count) => {
            recent_candles(client.as_ref(), product, granularity, count, Utc::now()).await?
        }
        None => {
            let (start, end) = match (start, end) {
                (Some(s), Some(e)) => (parse_date(&s)?, parse_date_end_of_day(&e)?),
                _ => anyhow::bail!("Provide --start and --end, or --recent N"),
            };

            let backfiller = CandleBackfiller::new(
                client as Arc<dyn CandleSource>,
                config.max_concurrent_requests,
                config.max_candles_per_request,
            );
            let outcome = backfiller.backfill(product, start, end, granularity).await?;
            for gap in &outcome.gaps {
                warn!("Gap {}: {}", gap.chunk, gap.error);
            }
            info!("Backfill complete: {}", outcome);
            outcome.candles
        }
    };

    let out_path = out.unwrap_or_else(|| config.data_dir.join(format!("{}_candles.csv", asset)));
    let written = write_csv(&out_path, &candles)?;
    info!("Wrote {} candles to {}", written, out_path.display());
    Ok(written as u64)
}

async fn run_odds(
    config: &CollectConfig,
    asset: &str,
    current_only: bool,
    slug: Option<String>,
    out_dir: Option<PathBuf>,
) -> Result<u64> {
    let asset = parse_asset(asset)?;

    let gamma_gate = Arc::new(RateGate::new(config.gamma_call_delay));
    let gamma = GammaClient::new(config.gamma.clone(), gamma_gate)?;

    let selected: Vec<MarketInstance> = match slug {
        Some(slug) => {
            let event = gamma.event_by_slug(&slug).await?;
            let instance = event
                .instance()
                .ok_or_else(|| anyhow::anyhow!("Event {} has no usable market data", slug))?;
            vec![instance]
        }
        None => {
            let events = hydrate_series(&gamma, asset.gamma_series_id()).await?;
            let instances: Vec<MarketInstance> =
                events.iter().filter_map(|e| e.instance()).collect();
            info!("{} series: {} instances", asset, instances.len());

            if current_only {
                vec![resolve_current(&instances, Utc::now())?.clone()]
            } else {
                instances
            }
        }
    };

    let clob_gate = Arc::new(RateGate::new(config.clob_call_delay));
    let clob: Arc<dyn ClobSource> = Arc::new(ClobClient::new(config.clob.clone(), clob_gate)?);
    let fetcher = OddsHistoryFetcher::new(
        clob,
        out_dir.unwrap_or_else(|| config.data_dir.join("odds_history")),
        config.history_interval.clone(),
        config.history_fidelity,
    );

    let stats = fetcher.fetch_instances(&selected).await?;
    info!("Odds history fetch complete: {}", stats);
    Ok(stats.files_written as u64)
}

fn run_resample(
    config: &CollectConfig,
    dir: Option<PathBuf>,
    step: Option<i64>,
    fill: Option<String>,
    out_dir: Option<PathBuf>,
) -> Result<u64> {
    let dir = dir.unwrap_or_else(|| config.data_dir.join("odds_history"));
    let out_dir = out_dir.unwrap_or_else(|| config.data_dir.join("resampled"));
    let step = step
        .map(chrono::Duration::seconds)
        .unwrap_or(config.resample_step);
    let fill = match fill {
        Some(s) => s.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        None => config.fill,
    };

    let entries = std::fs::read_dir(&dir)
        .with_context(|| format!("Failed to read history directory {}", dir.display()))?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|x| x == "json").unwrap_or(false))
        .collect();
    paths.sort();

    let mut files_written = 0u64;
    for path in paths {
        let file = match HistoryFile::load(&path) {
            Ok(file) => file,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };

        let points = file.points();
        let series = match resample(&points, step, fill) {
            Ok(series) => series,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        if series.is_empty() {
            warn!("No points in {}", path.display());
            continue;
        }

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("series");
        let out = out_dir.join(format!("{}_resampled.csv", stem));
        write_csv(&out, &series)?;
        info!("Resampled {} -> {} ({} rows)", path.display(), out.display(), series.len());
        files_written += 1;
    }

    Ok(files_written)
}

fn run_features(
    config: &CollectConfig,
    asset: &str,
    snapshots: Option<PathBuf>,
    candles: Option<PathBuf>,
    bar: Option<i64>,
    out: Option<PathBuf>,
) -> Result<u64> {
    let asset = parse_asset(asset)?;
    let snap_path = snapshots.unwrap_or_else(|| config.data_dir.join("odds_snapshots.ndjson"));
    let candles_path =
        candles.unwrap_or_else(|| config.data_dir.join(format!("{}_candles.csv", asset)));
    let bar = bar.map(chrono::Duration::seconds).unwrap_or(config.feature_bar);

    let snaps: Vec<OddsSnapshot> = read_records(&snap_path)?;
    let filtered: Vec<OddsSnapshot> = snaps.into_iter().filter(|s| s.series == asset).collect();
    info!("{} snapshots for {}", filtered.len(), asset);

    let spot = if candles_path.exists() {
        read_candles_csv(&candles_path)?
    } else {
        warn!(
            "No candle file at {}; spot columns will be empty",
            candles_path.display()
        );
        Vec::new()
    };

    let rows = align(&filtered, &spot, bar);
    let out_path = out.unwrap_or_else(|| config.data_dir.join(format!("{}_features.csv", asset)));
    let written = write_csv(&out_path, &rows)?;
    info!("Wrote {} feature rows to {}", written, out_path.display());
    Ok(written as u64)
}

async fn run_trades(
    config: &CollectConfig,
    asset: &str,
    limit: Option<u32>,
    interval: Option<u64>,
    iterations: Option<u64>,
    out: Option<PathBuf>,
) -> Result<u64> {
    let asset = parse_asset(asset)?;
    let instance = current_instance(config, asset).await?;

    let clob_gate = Arc::new(RateGate::new(config.clob_call_delay));
    let clob: Arc<dyn ClobSource> = Arc::new(ClobClient::new(config.clob.clone(), clob_gate)?);
    let path =
        out.unwrap_or_else(|| config.data_dir.join(format!("{}_trades.ndjson", instance.slug)));
    let writer = Arc::new(NdjsonWriter::new(path));

    let rec_config = RecorderConfig {
        interval: interval
            .map(StdDuration::from_secs)
            .unwrap_or(config.record_interval),
        iterations: iterations.unwrap_or(config.record_iterations),
        trade_limit: limit.unwrap_or(config.trade_limit),
    };

    let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
    let mut handle = tokio::spawn(async move {
        run_trade_poll(clob, writer, &instance, &rec_config, shutdown_rx).await
    });

    let stats = tokio::select! {
        result = &mut handle => result??,
        _ = wait_for_shutdown() => {
            let _ = shutdown_tx.send(());
            handle.await??
        }
    };

    info!("Trade polling complete: {}", stats);
    Ok(stats.records_written)
}

async fn run_books(config: &CollectConfig, asset: &str, out: Option<PathBuf>) -> Result<u64> {
    let asset = parse_asset(asset)?;
    let instance = current_instance(config, asset).await?;

    let clob_gate = Arc::new(RateGate::new(config.clob_call_delay));
    let clob = ClobClient::new(config.clob.clone(), clob_gate)?;
    let path =
        out.unwrap_or_else(|| config.data_dir.join(format!("{}_books.ndjson", instance.slug)));
    let writer = NdjsonWriter::new(path);

    let written = record_books_once(&clob, &writer, &instance).await?;
    Ok(written as u64)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        match CollectConfig::from_file(&cli.config) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config {}: {:#}", cli.config.display(), e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        CollectConfig::default()
    };
    config.apply_overrides(cli.log_level.as_deref(), cli.data_dir.as_deref());

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(false).init();

    info!("updown-collect v{}", env!("CARGO_PKG_VERSION"));
    if !cli.config.exists() {
        warn!(
            "Config file not found at {}, using defaults",
            cli.config.display()
        );
    }

    let result = match cli.command {
        Commands::Snapshot {
            interval,
            iterations,
            out,
        } => run_snapshot(&config, interval, iterations, out).await,
        Commands::Export {
            asset,
            snapshots,
            out,
        } => run_export(&config, &asset, snapshots, out),
        Commands::Candles {
            asset,
            start,
            end,
            recent,
            granularity,
            out,
        } => run_candles(&config, &asset, start, end, recent, granularity, out).await,
        Commands::Odds {
            asset,
            current,
            slug,
            out_dir,
        } => run_odds(&config, &asset, current, slug, out_dir).await,
        Commands::Resample {
            dir,
            step,
            fill,
            out_dir,
        } => run_resample(&config, dir, step, fill, out_dir),
        Commands::Features {
            asset,
            snapshots,
            candles,
            bar,
            out,
        } => run_features(&config, &asset, snapshots, candles, bar, out),
        Commands::Trades {
            asset,
            limit,
            interval,
            iterations,
            out,
        } => run_trades(&config, &asset, limit, interval, iterations, out).await,
        Commands::Books { asset, out } => run_books(&config, &asset, out).await,
    };

    match result {
        Ok(0) => {
            error!("No useful work was done");
            ExitCode::FAILURE
        }
        Ok(count) => {
            info!("Done: {} records", count);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date() {
        let dt = parse_date("2025-03-12").unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S").to_string(), "2025-03-12 00:00:00");
    }

    #[test]
    fn test_parse_date_end_of_day() {
        let dt = parse_date_end_of_day("2025-03-12").unwrap();
        assert_eq!(dt.format("%H:%M:%S").to_string(), "23:59:59");
    }

    #[test]
    fn test_parse_date_invalid() {
        assert!(parse_date("invalid").is_err());
        assert!(parse_date("12-03-2025").is_err());
        assert!(parse_date("2025/03/12").is_err());
    }

    #[test]
    fn test_parse_asset() {
        assert!(parse_asset("btc").is_ok());
        assert!(parse_asset("doge").is_err());
    }

    #[test]
    fn test_cli_parsing() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
