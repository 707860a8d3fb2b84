//! Shared types for the updown collection pipeline.
//!
//! All prices and probabilities use `rust_decimal::Decimal`; the only f64
//! in the model is `elapsed_hours`, which is a chart axis, not money.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Assets with a daily "up or down" Polymarket series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesAsset {
    Btc,
    Eth,
}

impl SeriesAsset {
    /// Gamma series id of the daily up/down series.
    pub fn gamma_series_id(&self) -> u64 {
        match self {
            SeriesAsset::Btc => 41,
            SeriesAsset::Eth => 40,
        }
    }

    /// Coinbase Exchange product for the spot reference (e.g., "BTC-USD").
    pub fn spot_product(&self) -> &'static str {
        match self {
            SeriesAsset::Btc => "BTC-USD",
            SeriesAsset::Eth => "ETH-USD",
        }
    }

    /// Slug prefix of the daily markets; the date part is appended
    /// as "{month-name}-{day}" (e.g., "bitcoin-up-or-down-on-march-12").
    pub fn slug_prefix(&self) -> &'static str {
        match self {
            SeriesAsset::Btc => "bitcoin-up-or-down-on-",
            SeriesAsset::Eth => "ethereum-up-or-down-on-",
        }
    }

    /// Lowercase label used in logs, config, and output records.
    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesAsset::Btc => "btc",
            SeriesAsset::Eth => "eth",
        }
    }

    /// All supported assets.
    pub fn all() -> &'static [SeriesAsset] {
        &[SeriesAsset::Btc, SeriesAsset::Eth]
    }
}

impl std::fmt::Display for SeriesAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SeriesAsset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "btc" | "bitcoin" => Ok(SeriesAsset::Btc),
            "eth" | "ethereum" => Ok(SeriesAsset::Eth),
            _ => Err(format!("Unknown series asset: {}", s)),
        }
    }
}

/// Fill policy for missing buckets when resampling odds onto a fixed grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FillPolicy {
    /// Carry the last seen value forward.
    #[default]
    Forward,
    /// Interpolate linearly between seen buckets; trailing gaps are dropped.
    Linear,
}

impl FillPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillPolicy::Forward => "ffill",
            FillPolicy::Linear => "linear",
        }
    }
}

impl std::fmt::Display for FillPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FillPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ffill" | "forward" | "pad" => Ok(FillPolicy::Forward),
            "linear" | "interpolate" => Ok(FillPolicy::Linear),
            _ => Err(format!("Unknown fill policy: {}", s)),
        }
    }
}

/// One daily market within a series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketInstance {
    /// Market slug (e.g., "bitcoin-up-or-down-on-march-12").
    pub slug: String,
    /// Market open time; the provider occasionally omits it.
    pub start_time: Option<DateTime<Utc>>,
    /// Market close / resolution time.
    pub end_time: DateTime<Utc>,
    /// Whether the provider has closed the market.
    pub closed: bool,
    /// CLOB token ids in outcome order (typically [up, down]).
    pub token_ids: Vec<String>,
}

impl MarketInstance {
    /// True if the market is still tradeable at `now`.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        !self.closed && self.end_time > now
    }
}

/// One observed odds point from CLOB price history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OddsPoint {
    /// Observation timestamp.
    pub ts: DateTime<Utc>,
    /// Traded price of the "up" outcome token, in [0, 1].
    #[serde(with = "rust_decimal::serde::str")]
    pub prob: Decimal,
}

impl OddsPoint {
    pub fn new(ts: DateTime<Utc>, prob: Decimal) -> Self {
        Self { ts, prob }
    }
}

/// Point-in-time flattened view of one market instance, one NDJSON line
/// per capture tick. Provider fields are carried through unmodified;
/// only `probability_up` is derived (first entry of `outcome_prices`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsSnapshot {
    /// Capture timestamp.
    pub ts: DateTime<Utc>,
    /// Series label ("btc" / "eth").
    pub series: SeriesAsset,
    /// Market slug.
    pub slug: String,
    /// Market close time, if the payload carried one.
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    /// Outcome names as listed by the provider.
    #[serde(default)]
    pub outcomes: Vec<String>,
    /// Outcome prices as raw strings, order matching `outcomes`.
    #[serde(default)]
    pub outcome_prices: Vec<String>,
    /// Parsed first outcome price; None when the payload is malformed.
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub probability_up: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub best_bid: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub best_ask: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub last_trade_price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub volume: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub volume_24hr: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub liquidity: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub one_day_price_change: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub one_hour_price_change: Option<Decimal>,
    /// CLOB token ids in outcome order.
    #[serde(default)]
    pub token_ids: Vec<String>,
}

/// One spot bar from the exchange. Field order is the CSV column order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time (UTC).
    pub timestamp: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::str")]
    pub open: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub close: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
}

/// One point of a resampled odds series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResampledPoint {
    /// Grid timestamp.
    pub ts: DateTime<Utc>,
    /// Probability after bucket averaging and gap filling.
    #[serde(with = "rust_decimal::serde::str")]
    pub prob: Decimal,
    /// Hours since the grid anchor (first observation).
    pub elapsed_hours: f64,
}
