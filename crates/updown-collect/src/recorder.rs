//! Raw CLOB activity recording for a single market instance.
//!
//! Trades are polled on an interval and appended as NDJSON, one line
//! per token per tick. A failed fetch becomes an error line in the same
//! file, so the record keeps its cadence even while the API misbehaves.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use updown_common::MarketInstance;
use updown_market::ClobSource;

use crate::ndjson::NdjsonWriter;

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Time between polls.
    pub interval: StdDuration,
    /// Number of polls before exiting; 0 runs until shutdown.
    pub iterations: u64,
    /// Trades requested per token per poll.
    pub trade_limit: u32,
}

#[derive(Debug, Default)]
pub struct RecorderStats {
    pub polls: u64,
    pub records_written: u64,
    pub fetch_errors: u64,
}

impl std::fmt::Display for RecorderStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} polls, {} records written, {} fetch errors",
            self.polls, self.records_written, self.fetch_errors
        )
    }
}

/// Polls recent trades for every token of `instance` until the
/// iteration limit is spent or a shutdown signal arrives.
pub async fn run_trade_poll(
    source: Arc<dyn ClobSource>,
    writer: Arc<NdjsonWriter>,
    instance: &MarketInstance,
    config: &RecorderConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<RecorderStats> {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut stats = RecorderStats::default();
    info!(
        "Trade polling {} ({} tokens) every {:?}",
        instance.slug,
        instance.token_ids.len(),
        config.interval
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let ts = Utc::now();
                for token_id in &instance.token_ids {
                    let record = match source.recent_trades(token_id, config.trade_limit).await {
                        Ok(trades) => json!({
                            "ts": ts,
                            "slug": instance.slug,
                            "token_id": token_id,
                            "trades": trades,
                        }),
                        Err(e) => {
                            stats.fetch_errors += 1;
                            json!({
                                "ts": ts,
                                "slug": instance.slug,
                                "token_id": token_id,
                                "error": e.to_string(),
                            })
                        }
                    };
                    match writer.append(&record) {
                        Ok(()) => stats.records_written += 1,
                        Err(e) => warn!("Trade record write failed: {}", e),
                    }
                }
                stats.polls += 1;
                if config.iterations > 0 && stats.polls >= config.iterations {
                    break;
                }
            }
            _ = shutdown.recv() => {
                info!("Trade polling shutting down");
                break;
            }
        }
    }

    Ok(stats)
}

/// Captures one order book snapshot per token. Returns the number of
/// lines written; fetch failures are recorded in-line like trade errors.
pub async fn record_books_once(
    source: &dyn ClobSource,
    writer: &NdjsonWriter,
    instance: &MarketInstance,
) -> Result<usize> {
    let ts = Utc::now();
    let mut written = 0;

    for token_id in &instance.token_ids {
        let record = match source.book(token_id).await {
            Ok(book) => json!({
                "ts": ts,
                "slug": instance.slug,
                "token_id": token_id,
                "book": book,
            }),
            Err(e) => {
                warn!("Book fetch failed for {}: {}", token_id, e);
                json!({
                    "ts": ts,
                    "slug": instance.slug,
                    "token_id": token_id,
                    "error": e.to_string(),
                })
            }
        };
        writer.append(&record)?;
        written += 1;
    }

    info!("Recorded {} book snapshots for {}", written, instance.slug);
    Ok(written)
}
