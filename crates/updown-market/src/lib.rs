//! Polymarket API layer: Gamma metadata, CLOB market data, and the
//! resolution logic that picks the current daily market.

pub mod client;
pub mod clob;
pub mod resolver;
pub mod summary;
pub mod types;

pub use client::{hydrate_series, EventSource, GammaClient, GammaConfig, GammaError};
pub use clob::{
    to_odds_points, ClobClient, ClobConfig, ClobError, ClobSource, PriceHistoryQuery, PricePoint,
    PricesHistoryResponse,
};
pub use resolver::{resolve_current, ResolveError};
pub use summary::{snapshot_row, snapshot_rows};
pub use types::{parse_datetime, parse_string_array, GammaEvent, GammaMarket, GammaSeries};
