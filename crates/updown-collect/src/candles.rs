//! Spot candle fetching from Coinbase Exchange, plus the chunked
//! backfiller that drives long-range downloads.
//!
//! The provider returns at most 300 rows per request, newest first, as
//! arrays `[time, low, high, open, close, volume]`. The backfiller plans
//! chunks under that cap, fetches them under bounded concurrency, and
//! merges the results into one ascending deduplicated series.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use futures::future::join_all;
use reqwest::Client;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use updown_common::{Candle, RateGate};

use crate::chunk::{plan_chunks, ChunkError, TimeChunk};

/// Errors from candle fetching and backfilling.
#[derive(Debug, Error)]
pub enum CandleError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Coinbase API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error(transparent)]
    Plan(#[from] ChunkError),
}

/// Configuration for the Coinbase client.
#[derive(Debug, Clone)]
pub struct CoinbaseConfig {
    /// Base URL of the Coinbase Exchange API.
    pub base_url: String,
    /// Request timeout.
    pub timeout: StdDuration,
    /// Number of retries on transport failure.
    pub max_retries: u32,
    /// Initial backoff duration for retries.
    pub initial_backoff: StdDuration,
}

impl Default for CoinbaseConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.exchange.coinbase.com".to_string(),
            timeout: StdDuration::from_secs(15),
            max_retries: 3,
            initial_backoff: StdDuration::from_secs(1),
        }
    }
}

/// Read access to spot candles, abstracted so the backfiller can run
/// against scripted sources in tests.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Bars for `[start, end)` at the given granularity. Row order is
    /// provider-defined; callers sort.
    async fn fetch_candles(
        &self,
        product: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity_secs: u32,
    ) -> Result<Vec<Candle>, CandleError>;
}

/// Coinbase Exchange REST client.
pub struct CoinbaseClient {
    client: Client,
    config: CoinbaseConfig,
    gate: Arc<RateGate>,
}

impl CoinbaseClient {
    pub fn new(config: CoinbaseConfig, gate: Arc<RateGate>) -> Result<Self, CandleError> {
        // Coinbase rejects requests without a User-Agent.
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("updown-collect/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            config,
            gate,
        })
    }

    /// Makes a GET request with retry and exponential backoff, honoring
    /// 429 Retry-After.
    async fn get_json(&self, url: &str) -> Result<serde_json::Value, CandleError> {
        let mut backoff = self.config.initial_backoff;

        for attempt in 0..=self.config.max_retries {
            self.gate.acquire().await;

            match self.client.get(url).send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        return response.json().await.map_err(CandleError::Http);
                    } else if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = response
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse().ok())
                            .unwrap_or(10);

                        if attempt < self.config.max_retries {
                            warn!(
                                "Coinbase rate limited, waiting {} seconds (attempt {}/{})",
                                retry_after,
                                attempt + 1,
                                self.config.max_retries
                            );
                            tokio::time::sleep(StdDuration::from_secs(retry_after)).await;
                            continue;
                        } else {
                            return Err(CandleError::RateLimited(retry_after));
                        }
                    } else {
                        let status = response.status().as_u16();
                        let body = response.text().await.unwrap_or_default();
                        return Err(CandleError::Api { status, body });
                    }
                }
                Err(e) if attempt < self.config.max_retries => {
                    warn!(
                        "Coinbase request failed: {} (attempt {}/{}), retrying in {:?}",
                        e,
                        attempt + 1,
                        self.config.max_retries,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(CandleError::Http(e)),
            }
        }

        unreachable!()
    }
}

#[async_trait]
impl CandleSource for CoinbaseClient {
    async fn fetch_candles(
        &self,
        product: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity_secs: u32,
    ) -> Result<Vec<Candle>, CandleError> {
        let url = format!(
            "{}/products/{}/candles?granularity={}&start={}&end={}",
            self.config.base_url,
            product,
            granularity_secs,
            start.to_rfc3339_opts(SecondsFormat::Secs, true),
            end.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        debug!("Fetching candles: {}", url);

        let value = self.get_json(&url).await?;
        let rows: Vec<Vec<serde_json::Value>> = serde_json::from_value(value)
            .map_err(|e| CandleError::Malformed(format!("candles payload: {}", e)))?;

        let total = rows.len();
        let candles: Vec<Candle> = rows.iter().filter_map(|arr| parse_candle_array(arr)).collect();
        if candles.len() < total {
            warn!(
                "Dropped {} malformed candle rows for {}",
                total - candles.len(),
                product
            );
        }

        Ok(candles)
    }
}

/// Parses one provider row: `[time, low, high, open, close, volume]`.
fn parse_candle_array(arr: &[serde_json::Value]) -> Option<Candle> {
    if arr.len() < 6 {
        return None;
    }
    let timestamp = DateTime::from_timestamp(arr[0].as_i64()?, 0)?;
    Some(Candle {
        timestamp,
        open: json_decimal(&arr[3])?,
        high: json_decimal(&arr[2])?,
        low: json_decimal(&arr[1])?,
        close: json_decimal(&arr[4])?,
        volume: json_decimal(&arr[5])?,
    })
}

fn json_decimal(value: &serde_json::Value) -> Option<Decimal> {
    value.as_f64().and_then(|f| Decimal::try_from(f).ok())
}

// ============================================================================
// Backfiller
// ============================================================================

/// One recorded fetch failure.
#[derive(Debug, Clone)]
pub struct ChunkGap {
    pub chunk: TimeChunk,
    pub error: String,
}

/// Outcome of a backfill run: the merged series plus every gap hit on
/// the way. Partial results are always surfaced, never discarded.
#[derive(Debug, Default)]
pub struct BackfillOutcome {
    pub candles: Vec<Candle>,
    pub gaps: Vec<ChunkGap>,
    pub chunks_fetched: usize,
    pub chunks_failed: usize,
    pub duplicates_dropped: usize,
}

impl std::fmt::Display for BackfillOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} candles from {} chunks ({} failed, {} duplicates dropped)",
            self.candles.len(),
            self.chunks_fetched + self.chunks_failed,
            self.chunks_failed,
            self.duplicates_dropped
        )
    }
}

/// Chunked history backfiller over any candle source.
pub struct CandleBackfiller {
    source: Arc<dyn CandleSource>,
    semaphore: Arc<Semaphore>,
    max_points_per_request: usize,
}

impl CandleBackfiller {
    pub fn new(
        source: Arc<dyn CandleSource>,
        max_concurrent_requests: usize,
        max_points_per_request: usize,
    ) -> Self {
        Self {
            source,
            semaphore: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
            max_points_per_request,
        }
    }

    /// Backfills `[start, end)` for one product. A failed chunk becomes a
    /// recorded gap and the run continues; the merged series is sorted
    /// ascending with exact-duplicate timestamps dropped keep-first in
    /// chunk order.
    pub async fn backfill(
        &self,
        product: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity_secs: u32,
    ) -> Result<BackfillOutcome, CandleError> {
        let sample_period = Duration::seconds(granularity_secs as i64);
        let chunks = plan_chunks(start, end, sample_period, self.max_points_per_request)?;
        let total = chunks.len();
        info!("Backfilling {} in {} chunks", product, total);

        let futures: Vec<_> = chunks
            .into_iter()
            .enumerate()
            .map(|(idx, chunk)| {
                let source = Arc::clone(&self.source);
                let semaphore = Arc::clone(&self.semaphore);
                let product = product.to_string();

                async move {
                    let _permit = semaphore.acquire().await.unwrap();
                    let result = source
                        .fetch_candles(&product, chunk.start, chunk.end, granularity_secs)
                        .await;
                    (idx, chunk, result)
                }
            })
            .collect();

        let mut results = join_all(futures).await;
        results.sort_by_key(|(idx, _, _)| *idx);

        let mut outcome = BackfillOutcome::default();
        let mut merged: Vec<Candle> = Vec::new();

        for (idx, chunk, result) in results {
            match result {
                Ok(mut candles) => {
                    // Provider order is newest-first; each chunk is
                    // normalized before the ascending merge.
                    candles.sort_by_key(|c| c.timestamp);
                    debug!(
                        "Chunk {}/{} {}: {} candles",
                        idx + 1,
                        total,
                        chunk,
                        candles.len()
                    );
                    outcome.chunks_fetched += 1;
                    merged.extend(candles);
                }
                Err(e) => {
                    warn!("Chunk {}/{} {} failed: {}", idx + 1, total, chunk, e);
                    outcome.chunks_failed += 1;
                    outcome.gaps.push(ChunkGap {
                        chunk,
                        error: e.to_string(),
                    });
                }
            }
        }

        // Stable sort: rows with equal timestamps keep chunk order, so
        // the earlier chunk wins the dedup below.
        merged.sort_by_key(|c| c.timestamp);
        let before = merged.len();
        merged.dedup_by_key(|c| c.timestamp);
        outcome.duplicates_dropped = before - merged.len();
        outcome.candles = merged;

        Ok(outcome)
    }
}

/// Fetches the most recent `count` bars in a single request. `count` is
/// expected to be at or under the provider cap; `now` is passed in so
/// callers control the clock.
pub async fn recent_candles(
    source: &dyn CandleSource,
    product: &str,
    granularity_secs: u32,
    count: usize,
    now: DateTime<Utc>,
) -> Result<Vec<Candle>, CandleError> {
    let span = Duration::seconds(granularity_secs as i64 * count as i64);
    let mut candles = source
        .fetch_candles(product, now - span, now, granularity_secs)
        .await?;
    candles.sort_by_key(|c| c.timestamp);
    candles.dedup_by_key(|c| c.timestamp);
    Ok(candles)
}
