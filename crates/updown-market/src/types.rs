//! Wire types for the Polymarket Gamma API.
//!
//! Gamma payloads are loosely typed: list fields arrive as JSON-encoded
//! strings, numeric fields arrive as numbers or strings depending on the
//! endpoint, and almost everything can be missing. Every field is
//! therefore optional; downstream code decides what is required.

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use updown_common::MarketInstance;

/// Deserializes an optional Decimal from a JSON number, a numeric string,
/// or null. Unparseable values become None rather than failing the row.
pub(crate) mod flex_decimal {
    use super::Decimal;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Str(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<Raw>::deserialize(deserializer)?;
        Ok(raw.and_then(|r| match r {
            Raw::Num(n) => Decimal::try_from(n).ok(),
            Raw::Str(s) => s.trim().parse().ok(),
        }))
    }
}

/// Market data embedded in a Gamma event.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GammaMarket {
    pub id: Option<String>,
    pub question: Option<String>,
    pub slug: Option<String>,
    /// Token IDs as JSON string array: `["123", "456"]`
    pub clob_token_ids: Option<String>,
    /// Outcomes as JSON string array: `["Up", "Down"]`
    pub outcomes: Option<String>,
    /// Outcome prices as JSON string array: `["0.55", "0.45"]`
    pub outcome_prices: Option<String>,
    pub end_date: Option<String>,
    pub closed: Option<bool>,
    #[serde(with = "flex_decimal")]
    pub best_bid: Option<Decimal>,
    #[serde(with = "flex_decimal")]
    pub best_ask: Option<Decimal>,
    #[serde(with = "flex_decimal")]
    pub last_trade_price: Option<Decimal>,
    #[serde(with = "flex_decimal")]
    pub one_day_price_change: Option<Decimal>,
    #[serde(with = "flex_decimal")]
    pub one_hour_price_change: Option<Decimal>,
}

/// Event data from the Gamma API.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GammaEvent {
    pub id: Option<String>,
    pub title: Option<String>,
    pub slug: Option<String>,
    pub start_date: Option<String>,
    pub creation_date: Option<String>,
    pub end_date: Option<String>,
    pub active: Option<bool>,
    pub closed: Option<bool>,
    #[serde(with = "flex_decimal")]
    pub volume: Option<Decimal>,
    #[serde(with = "flex_decimal")]
    pub volume_24hr: Option<Decimal>,
    #[serde(with = "flex_decimal")]
    pub liquidity: Option<Decimal>,
    pub markets: Option<Vec<GammaMarket>>,
}

/// Series payload from `GET /series/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GammaSeries {
    pub id: Option<String>,
    pub title: Option<String>,
    pub slug: Option<String>,
    pub events: Option<Vec<GammaEvent>>,
}

/// Decodes a Gamma JSON-encoded string array field. Missing or
/// malformed values decode to an empty list.
pub fn parse_string_array(raw: Option<&str>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
        .unwrap_or_default()
}

/// Parses a Gamma timestamp. Tries RFC 3339 first, then the
/// fractional-seconds "Z" form Gamma sometimes emits.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
                .map(|naive| naive.and_utc())
                .ok()
        })
}

impl GammaEvent {
    /// First embedded market, if any.
    pub fn primary_market(&self) -> Option<&GammaMarket> {
        self.markets.as_ref().and_then(|m| m.first())
    }

    /// Extracts the daily-market descriptor used by the resolver and the
    /// history fetchers. Returns None when the event has no slug or no
    /// parseable end date; token ids may still be empty on a stub event.
    pub fn instance(&self) -> Option<MarketInstance> {
        let slug = self.slug.clone()?;
        let end_time = self.end_date.as_deref().and_then(parse_datetime)?;
        let start_time = self
            .start_date
            .as_deref()
            .or(self.creation_date.as_deref())
            .and_then(parse_datetime);
        let token_ids = self
            .primary_market()
            .and_then(|m| m.clob_token_ids.as_deref())
            .map(|raw| parse_string_array(Some(raw)))
            .unwrap_or_default();

        Some(MarketInstance {
            slug,
            start_time,
            end_time,
            closed: self.closed.unwrap_or(false),
            token_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_gamma_event_parsing() {
        let json = r#"{
            "id": "9032",
            "title": "Bitcoin Up or Down on March 12?",
            "slug": "bitcoin-up-or-down-on-march-12",
            "startDate": "2025-03-11T16:00:00Z",
            "endDate": "2025-03-12T16:00:00Z",
            "active": true,
            "closed": false,
            "volume": "125000.5",
            "liquidity": 30000.25,
            "markets": [{
                "id": "5011",
                "question": "Bitcoin Up or Down on March 12?",
                "clobTokenIds": "[\"111\", \"222\"]",
                "outcomes": "[\"Up\", \"Down\"]",
                "outcomePrices": "[\"0.55\", \"0.45\"]",
                "bestBid": 0.54,
                "bestAsk": "0.56",
                "closed": false
            }]
        }"#;

        let event: GammaEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.slug.as_deref(), Some("bitcoin-up-or-down-on-march-12"));
        assert_eq!(event.volume, Some(dec!(125000.5)));
        assert_eq!(event.liquidity, Some(dec!(30000.25)));

        let market = event.primary_market().unwrap();
        assert_eq!(market.best_bid, Some(dec!(0.54)));
        assert_eq!(market.best_ask, Some(dec!(0.56)));
    }

    #[test]
    fn test_parse_string_array() {
        assert_eq!(
            parse_string_array(Some(r#"["111", "222"]"#)),
            vec!["111".to_string(), "222".to_string()]
        );
        assert!(parse_string_array(Some("not json")).is_empty());
        assert!(parse_string_array(None).is_empty());
    }

    #[test]
    fn test_parse_datetime_formats() {
        assert!(parse_datetime("2025-03-12T16:00:00Z").is_some());
        assert!(parse_datetime("2025-03-12T16:00:00.123Z").is_some());
        assert!(parse_datetime("2025-03-12T16:00:00+00:00").is_some());
        assert!(parse_datetime("march 12").is_none());
    }

    #[test]
    fn test_instance_extraction() {
        let json = r#"{
            "slug": "bitcoin-up-or-down-on-march-12",
            "endDate": "2025-03-12T16:00:00Z",
            "closed": false,
            "markets": [{"clobTokenIds": "[\"111\", \"222\"]"}]
        }"#;

        let event: GammaEvent = serde_json::from_str(json).unwrap();
        let instance = event.instance().unwrap();
        assert_eq!(instance.slug, "bitcoin-up-or-down-on-march-12");
        assert_eq!(instance.token_ids, vec!["111", "222"]);
        assert!(!instance.closed);
        assert!(instance.start_time.is_none());
    }

    #[test]
    fn test_instance_requires_end_date() {
        let event: GammaEvent =
            serde_json::from_str(r#"{"slug": "some-market", "closed": false}"#).unwrap();
        assert!(event.instance().is_none());

        let event: GammaEvent =
            serde_json::from_str(r#"{"endDate": "2025-03-12T16:00:00Z"}"#).unwrap();
        assert!(event.instance().is_none());
    }

    #[test]
    fn test_malformed_numeric_fields_become_none() {
        let json = r#"{
            "slug": "x",
            "volume": "not-a-number",
            "markets": [{"bestBid": "n/a"}]
        }"#;
        let event: GammaEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.volume, None);
        assert_eq!(event.primary_market().unwrap().best_bid, None);
    }
}
