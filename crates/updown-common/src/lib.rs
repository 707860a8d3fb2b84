//! Shared types and utilities for the updown collection pipeline.
//!
//! This crate contains:
//! - The data model (SeriesAsset, MarketInstance, OddsSnapshot, Candle)
//! - The rate gate injected into every HTTP client

pub mod rate;
pub mod types;

pub use rate::RateGate;
pub use types::*;
