//! AlphaTerm Core — price acquisition for terminal analytics.
//!
//! Turns a list of tickers into one aligned close-price table:
//! - Columnar price table (date index, one NaN-padded column per ticker)
//! - Lookback windows for period tokens (`1y`, `6mo`, `15d`, ...)
//! - Provider chain: Yahoo Finance batch, then Stooq CSV, then an opt-in
//!   seeded synthetic walk
//! - Gzip CSV cache keyed by request, with TTL and atomic writes

pub mod config;
pub mod data;
pub mod feed;
pub mod table;
pub mod window;

pub use config::{ConfigError, FeedConfig, ProviderMode};
pub use data::{CacheKey, CacheStore, DataSource, FetchFailure, PriceProvider, ProviderError};
pub use feed::{Acquisition, AcquireError, PriceFeed};
pub use table::{PriceColumn, PriceTable, TableError};
