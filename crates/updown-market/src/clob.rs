//! CLOB REST client: price history, recent trades, order books.
//!
//! Trade and book payloads are carried through as raw JSON; only price
//! history gets a typed decode because the resampler consumes it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use updown_common::{OddsPoint, RateGate};

/// Errors from the CLOB API client.
#[derive(Debug, Error)]
pub enum ClobError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("CLOB API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    #[error("Malformed payload: {0}")]
    Malformed(String),
}

/// Configuration for the CLOB client.
#[derive(Debug, Clone)]
pub struct ClobConfig {
    /// Base URL of the CLOB API.
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Number of retries on transport failure.
    pub max_retries: u32,
    /// Initial backoff duration for retries.
    pub initial_backoff: Duration,
}

impl Default for ClobConfig {
    fn default() -> Self {
        Self {
            base_url: "https://clob.polymarket.com".to_string(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

/// Parameters of one price-history request.
#[derive(Debug, Clone)]
pub struct PriceHistoryQuery {
    /// CLOB token id.
    pub token_id: String,
    /// Range start, epoch seconds.
    pub start_ts: i64,
    /// Range end, epoch seconds.
    pub end_ts: i64,
    /// Provider resolution window (e.g., "max"), passed through opaque.
    pub interval: String,
    /// Provider resolution in minutes, passed through opaque.
    pub fidelity: u32,
}

/// Response from the /prices-history endpoint.
#[derive(Debug, Deserialize)]
pub struct PricesHistoryResponse {
    pub history: Vec<PricePoint>,
}

/// A single price point from the API.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PricePoint {
    /// Unix timestamp in seconds.
    pub t: i64,
    /// Price value (0.0 to 1.0).
    pub p: f64,
}

impl PricePoint {
    /// Converts to the internal observation type. Points with an invalid
    /// timestamp or a non-finite price are dropped by the caller.
    pub fn to_odds_point(self) -> Option<OddsPoint> {
        let ts = DateTime::from_timestamp(self.t, 0)?;
        let prob = Decimal::try_from(self.p).ok()?;
        Some(OddsPoint::new(ts, prob))
    }
}

/// Converts raw wire points to observations, dropping and counting the
/// malformed ones.
pub fn to_odds_points(points: &[PricePoint]) -> Vec<OddsPoint> {
    let converted: Vec<OddsPoint> = points
        .iter()
        .filter_map(|p| p.to_odds_point())
        .collect();
    let dropped = points.len() - converted.len();
    if dropped > 0 {
        warn!("Dropped {} malformed price points", dropped);
    }
    converted
}

/// Read access to CLOB market data, abstracted so recorders and history
/// fetchers can run against scripted sources in tests.
#[async_trait]
pub trait ClobSource: Send + Sync {
    /// Price history for one token over a time range.
    async fn price_history(&self, query: &PriceHistoryQuery)
        -> Result<Vec<PricePoint>, ClobError>;

    /// Most recent trades for one token, raw payload.
    async fn recent_trades(&self, token_id: &str, limit: u32)
        -> Result<serde_json::Value, ClobError>;

    /// Current order book for one token, raw payload.
    async fn book(&self, token_id: &str) -> Result<serde_json::Value, ClobError>;
}

/// CLOB REST client.
pub struct ClobClient {
    client: Client,
    config: ClobConfig,
    gate: Arc<RateGate>,
}

impl ClobClient {
    pub fn new(config: ClobConfig, gate: Arc<RateGate>) -> Result<Self, ClobError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            config,
            gate,
        })
    }

    /// Makes a GET request with retry and exponential backoff, honoring
    /// 429 Retry-After.
    async fn get_json(&self, url: &str) -> Result<serde_json::Value, ClobError> {
        let mut backoff = self.config.initial_backoff;

        for attempt in 0..=self.config.max_retries {
            self.gate.acquire().await;

            match self.client.get(url).send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        return response.json().await.map_err(ClobError::Http);
                    } else if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = response
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse().ok())
                            .unwrap_or(60);

                        if attempt < self.config.max_retries {
                            warn!(
                                "CLOB rate limited, waiting {} seconds (attempt {}/{})",
                                retry_after,
                                attempt + 1,
                                self.config.max_retries
                            );
                            tokio::time::sleep(Duration::from_secs(retry_after)).await;
                            continue;
                        } else {
                            return Err(ClobError::RateLimited(retry_after));
                        }
                    } else {
                        let status = response.status().as_u16();
                        let body = response.text().await.unwrap_or_default();
                        return Err(ClobError::Api { status, body });
                    }
                }
                Err(e) if attempt < self.config.max_retries => {
                    warn!(
                        "CLOB request failed: {} (attempt {}/{}), retrying in {:?}",
                        e,
                        attempt + 1,
                        self.config.max_retries,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(ClobError::Http(e)),
            }
        }

        unreachable!()
    }
}

#[async_trait]
impl ClobSource for ClobClient {
    async fn price_history(
        &self,
        query: &PriceHistoryQuery,
    ) -> Result<Vec<PricePoint>, ClobError> {
        let url = format!(
            "{}/prices-history?market={}&startTs={}&endTs={}&interval={}&fidelity={}&order=asc",
            self.config.base_url,
            query.token_id,
            query.start_ts,
            query.end_ts,
            query.interval,
            query.fidelity
        );
        debug!("Fetching price history: {}", url);

        let value = self.get_json(&url).await?;
        let response: PricesHistoryResponse = serde_json::from_value(value)
            .map_err(|e| ClobError::Malformed(format!("prices-history payload: {}", e)))?;

        debug!(
            "Fetched {} price points for token {}",
            response.history.len(),
            query.token_id
        );

        Ok(response.history)
    }

    async fn recent_trades(
        &self,
        token_id: &str,
        limit: u32,
    ) -> Result<serde_json::Value, ClobError> {
        let url = format!(
            "{}/trades?market={}&limit={}",
            self.config.base_url, token_id, limit
        );
        self.get_json(&url).await
    }

    async fn book(&self, token_id: &str) -> Result<serde_json::Value, ClobError> {
        let url = format!("{}/book?token_id={}", self.config.base_url, token_id);
        self.get_json(&url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_point_parsing() {
        let json = r#"{"history": [{"t": 1741708800, "p": 0.45}]}"#;
        let response: PricesHistoryResponse = serde_json::from_str(json).unwrap();

        assert_eq!(response.history.len(), 1);
        assert_eq!(response.history[0].t, 1741708800);
        assert!((response.history[0].p - 0.45).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_response_parsing() {
        let json = r#"{"history": []}"#;
        let response: PricesHistoryResponse = serde_json::from_str(json).unwrap();
        assert!(response.history.is_empty());
    }

    #[test]
    fn test_to_odds_points_drops_malformed() {
        let points = vec![
            PricePoint { t: 1741708800, p: 0.45 },
            PricePoint { t: 1741708860, p: f64::NAN },
            PricePoint { t: 1741708920, p: 0.5 },
        ];

        let odds = to_odds_points(&points);
        assert_eq!(odds.len(), 2);
        assert_eq!(odds[0].prob, dec!(0.45));
        assert_eq!(odds[1].prob, dec!(0.5));
    }

    #[test]
    fn test_default_config() {
        let config = ClobConfig::default();
        assert_eq!(config.base_url, "https://clob.polymarket.com");
        assert_eq!(config.timeout, Duration::from_secs(10));
    }
}
