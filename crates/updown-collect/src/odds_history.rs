//! Full price-history download for market instances.
//!
//! Each outcome token gets one JSON file carrying the query window and
//! the raw points, so later resampling runs never need the network.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use updown_common::{MarketInstance, OddsPoint};
use updown_market::{to_odds_points, ClobError, ClobSource, PriceHistoryQuery, PricePoint};

#[derive(Debug, Error)]
pub enum OddsHistoryError {
    #[error(transparent)]
    Clob(#[from] ClobError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// On-disk shape of one downloaded history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryFile {
    pub slug: String,
    pub token_id: String,
    #[serde(rename = "startTs")]
    pub start_ts: i64,
    #[serde(rename = "endTs")]
    pub end_ts: i64,
    pub interval: String,
    pub fidelity: u32,
    pub history: Vec<PricePoint>,
}

impl HistoryFile {
    pub fn file_name(&self) -> String {
        format!("{}_{}.json", self.slug, self.token_id)
    }

    pub fn load(path: &Path) -> Result<Self, OddsHistoryError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Chronological odds points, with malformed prices dropped.
    pub fn points(&self) -> Vec<OddsPoint> {
        to_odds_points(&self.history)
    }
}

#[derive(Debug, Default)]
pub struct OddsFetchStats {
    pub files_written: usize,
    pub instances_skipped: usize,
    pub tokens_failed: usize,
}

impl std::fmt::Display for OddsFetchStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} history files written ({} instances skipped, {} tokens failed)",
            self.files_written, self.instances_skipped, self.tokens_failed
        )
    }
}

/// Downloads per-token price histories into a directory of JSON files.
pub struct OddsHistoryFetcher {
    source: Arc<dyn ClobSource>,
    out_dir: PathBuf,
    interval: String,
    fidelity: u32,
}

impl OddsHistoryFetcher {
    pub fn new(source: Arc<dyn ClobSource>, out_dir: PathBuf, interval: String, fidelity: u32) -> Self {
        Self {
            source,
            out_dir,
            interval,
            fidelity,
        }
    }

    /// Fetches every token of one instance. Instances without tokens or
    /// without a start time are skipped; individual token failures are
    /// logged and counted without aborting the rest.
    pub async fn fetch_instance(
        &self,
        instance: &MarketInstance,
    ) -> Result<OddsFetchStats, OddsHistoryError> {
        let mut stats = OddsFetchStats::default();

        let start = match instance.start_time {
            Some(start) if !instance.token_ids.is_empty() => start,
            _ => {
                warn!(
                    "Skipping {}: missing start time or outcome tokens",
                    instance.slug
                );
                stats.instances_skipped = 1;
                return Ok(stats);
            }
        };

        std::fs::create_dir_all(&self.out_dir)?;

        for token_id in &instance.token_ids {
            let query = PriceHistoryQuery {
                token_id: token_id.clone(),
                start_ts: start.timestamp(),
                end_ts: instance.end_time.timestamp(),
                interval: self.interval.clone(),
                fidelity: self.fidelity,
            };

            let history = match self.source.price_history(&query).await {
                Ok(points) => points,
                Err(e) => {
                    warn!("History fetch failed for {} token {}: {}", instance.slug, token_id, e);
                    stats.tokens_failed += 1;
                    continue;
                }
            };

            let record = HistoryFile {
                slug: instance.slug.clone(),
                token_id: token_id.clone(),
                start_ts: query.start_ts,
                end_ts: query.end_ts,
                interval: self.interval.clone(),
                fidelity: self.fidelity,
                history,
            };

            let path = self.out_dir.join(record.file_name());
            std::fs::write(&path, serde_json::to_string_pretty(&record)?)?;
            info!("Wrote {} ({} points)", path.display(), record.history.len());
            stats.files_written += 1;
        }

        Ok(stats)
    }

    pub async fn fetch_instances(
        &self,
        instances: &[MarketInstance],
    ) -> Result<OddsFetchStats, OddsHistoryError> {
        let mut stats = OddsFetchStats::default();
        for instance in instances {
            let one = self.fetch_instance(instance).await?;
            stats.files_written += one.files_written;
            stats.instances_skipped += one.instances_skipped;
            stats.tokens_failed += one.tokens_failed;
        }
        Ok(stats)
    }
}
