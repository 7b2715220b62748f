//! Market data providers and the price-table cache

pub mod cache;
pub mod key;
pub mod provider;
pub mod stooq;
pub mod synthetic;
pub mod yahoo;

pub use cache::{CacheEntryInfo, CacheError, CacheLookup, CacheStore, EntryKind};
pub use key::CacheKey;
pub use provider::{DataSource, FetchFailure, PriceProvider, ProviderError};
pub use stooq::StooqProvider;
pub use synthetic::SyntheticProvider;
pub use yahoo::YahooProvider;
