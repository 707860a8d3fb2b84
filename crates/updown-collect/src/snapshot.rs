//! Periodic odds snapshot collection.
//!
//! Every tick hydrates the configured series from Gamma and appends one
//! NDJSON row per event. Provider failures cost one tick for that
//! series, never the loop.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use updown_common::{OddsSnapshot, SeriesAsset};
use updown_market::{hydrate_series, snapshot_rows, EventSource};

use crate::csv_out::write_csv;
use crate::ndjson::{read_records, NdjsonWriter};

#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Time between ticks.
    pub interval: StdDuration,
    /// Number of ticks before exiting; 0 runs until shutdown.
    pub iterations: u64,
    /// Series to snapshot each tick.
    pub assets: Vec<SeriesAsset>,
}

#[derive(Debug, Default)]
pub struct SnapshotStats {
    pub ticks: u64,
    pub rows_written: u64,
    pub series_failures: u64,
}

impl std::fmt::Display for SnapshotStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ticks, {} rows written, {} series failures",
            self.ticks, self.rows_written, self.series_failures
        )
    }
}

/// Runs the snapshot loop until the iteration limit is spent or a
/// shutdown signal arrives.
pub async fn run_snapshot_loop(
    source: Arc<dyn EventSource>,
    writer: Arc<NdjsonWriter>,
    config: &SnapshotConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<SnapshotStats> {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut stats = SnapshotStats::default();
    info!(
        "Snapshot loop started: {:?} interval, assets {:?}",
        config.interval, config.assets
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Utc::now();
                for asset in &config.assets {
                    match hydrate_series(source.as_ref(), asset.gamma_series_id()).await {
                        Ok(events) => {
                            let rows = snapshot_rows(*asset, &events, now);
                            for row in &rows {
                                match writer.append(row) {
                                    Ok(()) => stats.rows_written += 1,
                                    Err(e) => warn!("Snapshot write failed: {}", e),
                                }
                            }
                        }
                        Err(e) => {
                            warn!("Series {} fetch failed: {}", asset, e);
                            stats.series_failures += 1;
                        }
                    }
                }
                stats.ticks += 1;
                if config.iterations > 0 && stats.ticks >= config.iterations {
                    break;
                }
            }
            _ = shutdown.recv() => {
                info!("Snapshot loop shutting down");
                break;
            }
        }
    }

    Ok(stats)
}

/// One row of the flattened daily export.
#[derive(Debug, Serialize, Deserialize)]
pub struct DailyExportRow {
    pub ts: DateTime<Utc>,
    pub slug: String,
    pub end_date: Option<DateTime<Utc>>,
    pub prob_up: Option<Decimal>,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub last_trade_price: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub volume_24hr: Option<Decimal>,
    pub liquidity: Option<Decimal>,
}

impl From<OddsSnapshot> for DailyExportRow {
    fn from(s: OddsSnapshot) -> Self {
        Self {
            ts: s.ts,
            slug: s.slug,
            end_date: s.end_date,
            prob_up: s.probability_up,
            best_bid: s.best_bid,
            best_ask: s.best_ask,
            last_trade_price: s.last_trade_price,
            volume: s.volume,
            volume_24hr: s.volume_24hr,
            liquidity: s.liquidity,
        }
    }
}

/// Flattens one asset's snapshot log into a CSV table. Returns the
/// number of rows exported.
pub fn export_daily(snapshot_path: &Path, asset: SeriesAsset, out_path: &Path) -> Result<usize> {
    let snapshots: Vec<OddsSnapshot> = read_records(snapshot_path)?;
    let rows: Vec<DailyExportRow> = snapshots
        .into_iter()
        .filter(|s| s.series == asset)
        .map(DailyExportRow::from)
        .collect();

    let written = write_csv(out_path, &rows)?;
    info!("Exported {} {} rows to {}", written, asset, out_path.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use updown_market::{GammaError, GammaEvent, GammaMarket};

    struct ScriptedGamma {
        fail_series: Option<u64>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EventSource for ScriptedGamma {
        async fn series_events(&self, series_id: u64) -> Result<Vec<GammaEvent>, GammaError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.fail_series == Some(series_id) {
                return Err(GammaError::Api {
                    status: 502,
                    body: "bad gateway".to_string(),
                });
            }
            Ok(vec![GammaEvent {
                slug: Some(format!("series-{}-daily", series_id)),
                end_date: Some("2025-03-13T12:00:00Z".to_string()),
                markets: Some(vec![GammaMarket {
                    outcome_prices: Some("[\"0.55\", \"0.45\"]".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }])
        }

        async fn event_by_slug(&self, slug: &str) -> Result<GammaEvent, GammaError> {
            self.series_events(0).await.map(|mut v| {
                let mut event = v.remove(0);
                event.slug = Some(slug.to_string());
                event
            })
        }
    }

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("updown-snap-{}-{}.ndjson", tag, std::process::id()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_honors_iteration_limit() {
        let path = temp_path("limit");
        let _ = std::fs::remove_file(&path);

        let source = Arc::new(ScriptedGamma {
            fail_series: None,
            calls: AtomicUsize::new(0),
        });
        let writer = Arc::new(NdjsonWriter::new(path.clone()));
        let (_tx, rx) = broadcast::channel(1);

        let config = SnapshotConfig {
            interval: StdDuration::from_secs(60),
            iterations: 2,
            assets: vec![SeriesAsset::Btc],
        };
        let stats = run_snapshot_loop(source, Arc::clone(&writer), &config, rx)
            .await
            .unwrap();

        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.rows_written, 2);
        assert_eq!(stats.series_failures, 0);

        let rows: Vec<OddsSnapshot> = read_records(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].series, SeriesAsset::Btc);
        assert_eq!(rows[0].probability_up, Some(dec!(0.55)));

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_series_failure_is_counted_not_fatal() {
        let path = temp_path("failure");
        let _ = std::fs::remove_file(&path);

        let source = Arc::new(ScriptedGamma {
            fail_series: Some(SeriesAsset::Btc.gamma_series_id()),
            calls: AtomicUsize::new(0),
        });
        let writer = Arc::new(NdjsonWriter::new(path.clone()));
        let (_tx, rx) = broadcast::channel(1);

        let config = SnapshotConfig {
            interval: StdDuration::from_secs(60),
            iterations: 1,
            assets: vec![SeriesAsset::Btc, SeriesAsset::Eth],
        };
        let stats = run_snapshot_loop(source, writer, &config, rx).await.unwrap();

        assert_eq!(stats.ticks, 1);
        assert_eq!(stats.series_failures, 1);
        assert_eq!(stats.rows_written, 1);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_shutdown_stops_unbounded_loop() {
        let path = temp_path("shutdown");
        let _ = std::fs::remove_file(&path);

        let source = Arc::new(ScriptedGamma {
            fail_series: None,
            calls: AtomicUsize::new(0),
        });
        let writer = Arc::new(NdjsonWriter::new(path.clone()));
        let (tx, rx) = broadcast::channel(1);

        let config = SnapshotConfig {
            interval: StdDuration::from_millis(10),
            iterations: 0,
            assets: vec![SeriesAsset::Btc],
        };
        let handle = tokio::spawn(async move {
            run_snapshot_loop(source, writer, &config, rx).await
        });

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        tx.send(()).unwrap();

        let stats = handle.await.unwrap().unwrap();
        assert!(stats.ticks >= 1);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_export_daily_filters_by_series() {
        let snap_path = temp_path("export-in");
        let out_path = std::env::temp_dir().join(format!(
            "updown-snap-export-out-{}.csv",
            std::process::id()
        ));

        std::fs::write(
            &snap_path,
            concat!(
                "{\"ts\":\"2025-03-12T12:00:00Z\",\"series\":\"btc\",\"slug\":\"btc-up\",\"end_date\":null,",
                "\"outcomes\":[],\"outcome_prices\":[],\"probability_up\":\"0.61\",\"token_ids\":[]}\n",
                "{\"ts\":\"2025-03-12T12:00:00Z\",\"series\":\"eth\",\"slug\":\"eth-up\",\"end_date\":null,",
                "\"outcomes\":[],\"outcome_prices\":[],\"probability_up\":\"0.40\",\"token_ids\":[]}\n",
            ),
        )
        .unwrap();

        let written = export_daily(&snap_path, SeriesAsset::Btc, &out_path).unwrap();
        assert_eq!(written, 1);

        let content = std::fs::read_to_string(&out_path).unwrap();
        assert!(content.contains("btc-up"));
        assert!(!content.contains("eth-up"));

        std::fs::remove_file(&snap_path).unwrap();
        std::fs::remove_file(&out_path).unwrap();
    }
}
