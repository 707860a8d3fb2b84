//! Feature table construction: odds snapshots joined to spot candles.
//!
//! Each snapshot maps to the bar whose window contains it. The join is
//! left-outer: snapshots without a matching bar keep empty spot columns
//! so no odds observation is lost to a candle gap.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use updown_common::{Candle, OddsSnapshot, SeriesAsset};

/// One output row: odds fields, derived quote stats, and the matched
/// spot bar (when present).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRow {
    pub ts: DateTime<Utc>,
    pub series: SeriesAsset,
    pub slug: String,
    pub end_date: Option<DateTime<Utc>>,
    pub prob_up: Option<Decimal>,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub last_trade_price: Option<Decimal>,
    /// Quote midpoint, when both sides are present.
    pub mid: Option<Decimal>,
    /// Ask minus bid, when both sides are present.
    pub spread: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub volume_24hr: Option<Decimal>,
    pub liquidity: Option<Decimal>,
    /// Open time of the bar this snapshot falls into.
    pub bar_time: DateTime<Utc>,
    pub spot_open: Option<Decimal>,
    pub spot_high: Option<Decimal>,
    pub spot_low: Option<Decimal>,
    pub spot_close: Option<Decimal>,
    pub spot_volume: Option<Decimal>,
}

/// Floors a timestamp to the open of its bar. Non-positive bar lengths
/// leave the timestamp unchanged.
pub fn floor_to_bucket(ts: DateTime<Utc>, bar: Duration) -> DateTime<Utc> {
    let bar_secs = bar.num_seconds();
    if bar_secs <= 0 {
        return ts;
    }
    let floored = ts.timestamp() - ts.timestamp().rem_euclid(bar_secs);
    DateTime::from_timestamp(floored, 0).unwrap_or(ts)
}

/// Left-joins snapshots to candles on the floored bar time.
pub fn align(snapshots: &[OddsSnapshot], candles: &[Candle], bar: Duration) -> Vec<FeatureRow> {
    let by_bar: HashMap<i64, &Candle> = candles
        .iter()
        .map(|c| (c.timestamp.timestamp(), c))
        .collect();

    snapshots
        .iter()
        .map(|snap| {
            let bar_time = floor_to_bucket(snap.ts, bar);
            let candle = by_bar.get(&bar_time.timestamp());

            let (mid, spread) = match (snap.best_bid, snap.best_ask) {
                (Some(bid), Some(ask)) => (Some((bid + ask) / Decimal::TWO), Some(ask - bid)),
                _ => (None, None),
            };

            FeatureRow {
                ts: snap.ts,
                series: snap.series,
                slug: snap.slug.clone(),
                end_date: snap.end_date,
                prob_up: snap.probability_up,
                best_bid: snap.best_bid,
                best_ask: snap.best_ask,
                last_trade_price: snap.last_trade_price,
                mid,
                spread,
                volume: snap.volume,
                volume_24hr: snap.volume_24hr,
                liquidity: snap.liquidity,
                bar_time,
                spot_open: candle.map(|c| c.open),
                spot_high: candle.map(|c| c.high),
                spot_low: candle.map(|c| c.low),
                spot_close: candle.map(|c| c.close),
                spot_volume: candle.map(|c| c.volume),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 12, h, m, s).unwrap()
    }

    fn snapshot(at: DateTime<Utc>, bid: Option<Decimal>, ask: Option<Decimal>) -> OddsSnapshot {
        OddsSnapshot {
            ts: at,
            series: SeriesAsset::Btc,
            slug: "bitcoin-up-or-down-on-march-12".to_string(),
            end_date: Some(ts(16, 0, 0)),
            outcomes: vec!["Up".to_string(), "Down".to_string()],
            outcome_prices: vec!["0.55".to_string(), "0.45".to_string()],
            probability_up: Some(dec!(0.55)),
            best_bid: bid,
            best_ask: ask,
            last_trade_price: Some(dec!(0.55)),
            volume: Some(dec!(10000)),
            volume_24hr: None,
            liquidity: None,
            one_day_price_change: None,
            one_hour_price_change: None,
            token_ids: vec!["111".to_string(), "222".to_string()],
        }
    }

    fn candle(at: DateTime<Utc>) -> Candle {
        Candle {
            timestamp: at,
            open: dec!(81200),
            high: dec!(81500),
            low: dec!(81000),
            close: dec!(81400),
            volume: dec!(12.25),
        }
    }

    #[test]
    fn test_floor_to_bucket() {
        let bar = Duration::minutes(5);
        assert_eq!(floor_to_bucket(ts(10, 0, 0), bar), ts(10, 0, 0));
        assert_eq!(floor_to_bucket(ts(10, 3, 59), bar), ts(10, 0, 0));
        assert_eq!(floor_to_bucket(ts(10, 5, 0), bar), ts(10, 5, 0));
        // Degenerate bars leave the timestamp alone.
        assert_eq!(floor_to_bucket(ts(10, 3, 0), Duration::zero()), ts(10, 3, 0));
    }

    #[test]
    fn test_align_left_join() {
        let snapshots = vec![
            snapshot(ts(10, 2, 30), Some(dec!(0.54)), Some(dec!(0.56))),
            snapshot(ts(10, 7, 0), Some(dec!(0.54)), Some(dec!(0.56))),
        ];
        let candles = vec![candle(ts(10, 0, 0))];

        let rows = align(&snapshots, &candles, Duration::minutes(5));
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].bar_time, ts(10, 0, 0));
        assert_eq!(rows[0].spot_close, Some(dec!(81400)));

        // No bar at 10:05, but the odds row survives.
        assert_eq!(rows[1].bar_time, ts(10, 5, 0));
        assert_eq!(rows[1].spot_close, None);
        assert_eq!(rows[1].prob_up, Some(dec!(0.55)));
    }

    #[test]
    fn test_mid_and_spread_derivation() {
        let snapshots = vec![
            snapshot(ts(10, 0, 0), Some(dec!(0.54)), Some(dec!(0.56))),
            snapshot(ts(10, 1, 0), None, Some(dec!(0.56))),
        ];
        let rows = align(&snapshots, &[], Duration::minutes(5));

        assert_eq!(rows[0].mid, Some(dec!(0.55)));
        assert_eq!(rows[0].spread, Some(dec!(0.02)));
        assert_eq!(rows[1].mid, None);
        assert_eq!(rows[1].spread, None);
    }
}
