//! Flattens hydrated Gamma events into point-in-time snapshot rows.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use updown_common::{OddsSnapshot, SeriesAsset};

use crate::types::{parse_datetime, parse_string_array, GammaEvent};

/// Builds one snapshot row from a hydrated event, stamped with the
/// capture time. Provider fields are carried through as-is; only
/// `probability_up` is derived, from the first outcome price. Returns
/// None for events without a slug (nothing to key the row on).
pub fn snapshot_row(
    asset: SeriesAsset,
    event: &GammaEvent,
    ts: DateTime<Utc>,
) -> Option<OddsSnapshot> {
    let slug = event.slug.clone()?;
    let market = event.primary_market();

    let outcomes = parse_string_array(market.and_then(|m| m.outcomes.as_deref()));
    let outcome_prices = parse_string_array(market.and_then(|m| m.outcome_prices.as_deref()));
    let probability_up = outcome_prices
        .first()
        .and_then(|raw| raw.trim().parse::<Decimal>().ok());
    let token_ids = parse_string_array(market.and_then(|m| m.clob_token_ids.as_deref()));

    let end_date = event
        .end_date
        .as_deref()
        .or_else(|| market.and_then(|m| m.end_date.as_deref()))
        .and_then(parse_datetime);

    Some(OddsSnapshot {
        ts,
        series: asset,
        slug,
        end_date,
        outcomes,
        outcome_prices,
        probability_up,
        best_bid: market.and_then(|m| m.best_bid),
        best_ask: market.and_then(|m| m.best_ask),
        last_trade_price: market.and_then(|m| m.last_trade_price),
        volume: event.volume,
        volume_24hr: event.volume_24hr,
        liquidity: event.liquidity,
        one_day_price_change: market.and_then(|m| m.one_day_price_change),
        one_hour_price_change: market.and_then(|m| m.one_hour_price_change),
        token_ids,
    })
}

/// Flattens a whole series listing, skipping slugless events.
pub fn snapshot_rows(
    asset: SeriesAsset,
    events: &[GammaEvent],
    ts: DateTime<Utc>,
) -> Vec<OddsSnapshot> {
    events
        .iter()
        .filter_map(|event| snapshot_row(asset, event, ts))
        .collect()
}
