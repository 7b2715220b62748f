//! Cache identities for price requests.
//!
//! A key is the BLAKE3 hash of `mode|TICKERS|period|interval`, where the
//! ticker set is uppercased, sorted and deduplicated. Truncated to 16 hex
//! characters (64 bits) so it stays filename-friendly.

use crate::config::ProviderMode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a cache key in hex characters.
pub const KEY_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a request.
    ///
    /// Built from the configured mode, not from whichever provider ends up
    /// answering, so a fallback result is found again on the next request.
    pub fn build<S: AsRef<str>>(
        mode: ProviderMode,
        tickers: &[S],
        period: &str,
        interval: &str,
    ) -> Self {
        let hash = blake3::hash(canonical_request(mode, tickers, period, interval).as_bytes());
        let hex = hash.to_hex();
        Self(hex.as_str()[..KEY_LEN].to_string())
    }

    /// Wrap an existing key string (e.g. one recovered from a cache filename).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pre-hash form of a request. `|` never appears in a ticker symbol.
fn canonical_request<S: AsRef<str>>(
    mode: ProviderMode,
    tickers: &[S],
    period: &str,
    interval: &str,
) -> String {
    let mut symbols: Vec<String> = tickers
        .iter()
        .map(|t| t.as_ref().trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .collect();
    symbols.sort();
    symbols.dedup();

    format!(
        "{}|{}|{}|{}",
        mode.as_str(),
        symbols.join(","),
        period.trim().to_ascii_lowercase(),
        interval.trim().to_ascii_lowercase(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ticker_order_and_case_do_not_matter() {
        let a = CacheKey::build(ProviderMode::Auto, &["aapl", "MSFT"], "2y", "1d");
        let b = CacheKey::build(ProviderMode::Auto, &["MSFT", "AAPL"], "2y", "1d");
        assert_eq!(a, b);
    }

    #[test]
    fn key_is_fixed_length_hex() {
        let key = CacheKey::build(ProviderMode::Auto, &["SPY"], "1y", "1d");
        assert_eq!(key.as_str().len(), KEY_LEN);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn every_component_contributes() {
        let base = CacheKey::build(ProviderMode::Auto, &["SPY"], "1y", "1d");
        assert_ne!(base, CacheKey::build(ProviderMode::Stooq, &["SPY"], "1y", "1d"));
        assert_ne!(base, CacheKey::build(ProviderMode::Auto, &["QQQ"], "1y", "1d"));
        assert_ne!(base, CacheKey::build(ProviderMode::Auto, &["SPY"], "2y", "1d"));
        assert_ne!(base, CacheKey::build(ProviderMode::Auto, &["SPY"], "1y", "1wk"));
    }

    #[test]
    fn canonical_form() {
        assert_eq!(
            canonical_request(ProviderMode::Yahoo, &["msft", " aapl", "MSFT"], "2Y", "1d"),
            "yahoo|AAPL,MSFT|2y|1d"
        );
    }

    proptest! {
        #[test]
        fn permutations_share_a_key(
            mut tickers in proptest::collection::vec("[a-zA-Z]{1,5}", 1..8),
            seed in any::<u64>(),
        ) {
            let original = CacheKey::build(ProviderMode::Auto, &tickers, "2y", "1d");
            let shift = (seed as usize) % tickers.len();
            tickers.rotate_left(shift);
            let shuffled: Vec<String> = tickers.iter().rev().map(|t| t.to_lowercase()).collect();
            prop_assert_eq!(original, CacheKey::build(ProviderMode::Auto, &shuffled, "2y", "1d"));
        }
    }
}
