//! Price provider trait and structured error types.
//!
//! The PriceProvider trait abstracts over data sources (Yahoo Finance, Stooq,
//! the synthetic generator) so the feed can try them in order and tests can
//! swap in stubs. The cache layer sits above this trait; providers don't know
//! about the cache.

use crate::table::{PriceTable, TableError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why a single provider attempt failed.
///
/// Designed to be displayable in CLI output and aggregated into one message.
#[derive(Debug, Error)]
pub enum FetchFailure {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("HTTP {status} for {target}")]
    HttpStatus { status: u16, target: String },

    #[error("rate limited{}", retry_hint(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("no data returned for {0}")]
    EmptyResponse(String),

    #[error("response missing Close/Adj Close")]
    MissingCloseField,

    #[error("no rows in range for {ticker}")]
    NoRowsInRange { ticker: String },

    #[error("no usable prices (all values missing)")]
    AllMissing,
}

fn retry_hint(retry_after_secs: &Option<u64>) -> String {
    retry_after_secs
        .map(|secs| format!(" (retry after {secs}s)"))
        .unwrap_or_default()
}

impl From<TableError> for FetchFailure {
    fn from(err: TableError) -> Self {
        match err {
            TableError::Empty => FetchFailure::AllMissing,
            other => FetchFailure::ResponseFormatChanged(other.to_string()),
        }
    }
}

/// A failed attempt by one named provider.
#[derive(Debug, Error)]
#[error("{provider}: {reason}")]
pub struct ProviderError {
    pub provider: String,
    pub reason: FetchFailure,
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, reason: FetchFailure) -> Self {
        Self {
            provider: provider.into(),
            reason,
        }
    }
}

/// Where a price table came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataSource {
    Cache,
    YahooFinance,
    Stooq,
    Synthetic,
}

impl DataSource {
    pub fn name(self) -> &'static str {
        match self {
            DataSource::Cache => "cache",
            DataSource::YahooFinance => "yahoo",
            DataSource::Stooq => "stooq",
            DataSource::Synthetic => "synthetic",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A source of close-price tables.
///
/// `tickers` arrive uppercased, trimmed and deduplicated. Implementations
/// return a normalized table whose columns are a subset of `tickers`, or a
/// [`ProviderError`] naming themselves.
pub trait PriceProvider: Send + Sync {
    /// Human-readable name used in logs and aggregated errors.
    fn name(&self) -> &str;

    /// Provenance tag attached to tables this provider produces.
    fn source(&self) -> DataSource;

    /// Fetch close prices for `tickers` over `period` sampled at `interval`.
    fn fetch(
        &self,
        tickers: &[String],
        period: &str,
        interval: &str,
    ) -> Result<PriceTable, ProviderError>;
}

/// Blocking HTTP client shared by the network providers.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::blocking::Client, reqwest::Error> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
        .build()
}

/// Classify a transport-level reqwest error.
pub(crate) fn transport_failure(err: &reqwest::Error) -> FetchFailure {
    if err.is_timeout() {
        FetchFailure::NetworkUnreachable(format!("request timed out: {err}"))
    } else {
        FetchFailure::NetworkUnreachable(err.to_string())
    }
}
