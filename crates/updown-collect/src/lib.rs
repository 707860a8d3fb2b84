//! updown-collect: odds and spot data collection for daily up/down markets.
//!
//! This crate provides:
//! - Periodic odds snapshots from the Gamma API
//! - Full price-history downloads from the CLOB API
//! - Chunked spot candle backfill from Coinbase Exchange
//! - Resampling and odds/spot alignment for analysis tables

pub mod candles;
pub mod chunk;
pub mod config;
pub mod csv_out;
pub mod features;
pub mod ndjson;
pub mod odds_history;
pub mod recorder;
pub mod resample;
pub mod snapshot;
