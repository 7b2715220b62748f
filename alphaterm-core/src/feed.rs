//! Price acquisition: cache, then providers in priority order, then synthetic.
//!
//! Given a list of tickers, returns one normalized [`PriceTable`]. Implements
//! the fallback policy:
//! 1. If a fresh cache entry exists for the request → use it. Cached
//!    synthetic tables only answer when synthetic data is allowed, and are
//!    reported as synthetic
//! 2. Otherwise try each configured provider in order; the first success is
//!    written through to the cache and returned
//! 3. If every provider failed and synthetic data is allowed → generate,
//!    cache and return it (tagged synthetic)
//! 4. Otherwise → fail with every provider's error
//!
//! Providers are never raced: the secondary provider costs one request per
//! ticker, and the cache absorbs the price of sequential fallbacks.

use crate::config::{ConfigError, FeedConfig};
use crate::data::{
    CacheKey, CacheStore, DataSource, EntryKind, PriceProvider, ProviderError, StooqProvider,
    SyntheticProvider, YahooProvider,
};
use crate::table::PriceTable;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors surfaced to callers of the feed.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("no tickers provided")]
    NoTickers,

    #[error("price fetch failed. {}", join_failures(.failures))]
    ExhaustedProviders { failures: Vec<ProviderError> },
}

impl AcquireError {
    /// Provider failures behind this error (empty for input errors).
    pub fn failures(&self) -> &[ProviderError] {
        match self {
            AcquireError::NoTickers => &[],
            AcquireError::ExhaustedProviders { failures } => failures,
        }
    }
}

fn join_failures(failures: &[ProviderError]) -> String {
    if failures.is_empty() {
        return "no providers configured".into();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" | ")
}

/// A price table together with where it came from.
#[derive(Debug)]
pub struct Acquisition {
    pub table: PriceTable,
    pub source: DataSource,
    pub cache_key: CacheKey,
    /// Providers that failed before `source` answered, in attempt order.
    pub failures: Vec<ProviderError>,
}

/// The acquisition orchestrator.
pub struct PriceFeed {
    config: FeedConfig,
    cache: CacheStore,
    providers: Vec<Box<dyn PriceProvider>>,
    synthetic: Option<SyntheticProvider>,
}

impl PriceFeed {
    /// Build a feed with the real providers selected by `config.provider_mode`:
    /// Yahoo first, then Stooq.
    pub fn new(config: FeedConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let client_error = |e: reqwest::Error| ConfigError::HttpClient(e.to_string());

        let mut providers: Vec<Box<dyn PriceProvider>> = Vec::new();
        if config.provider_mode.includes(DataSource::YahooFinance) {
            providers.push(Box::new(YahooProvider::new(&config).map_err(client_error)?));
        }
        if config.provider_mode.includes(DataSource::Stooq) {
            providers.push(Box::new(StooqProvider::new(&config).map_err(client_error)?));
        }

        Ok(Self::with_providers(config, providers))
    }

    /// Build a feed over an explicit, already-ordered provider list.
    ///
    /// The synthetic fallback and cache still come from `config`.
    pub fn with_providers(config: FeedConfig, providers: Vec<Box<dyn PriceProvider>>) -> Self {
        let cache = CacheStore::new(&config.cache_dir);
        let synthetic = config
            .allow_synthetic
            .then(|| SyntheticProvider::new(config.synthetic_seed));
        Self {
            config,
            cache,
            providers,
            synthetic,
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Names of the real providers, in the order they are tried.
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Fetch a close-price table for `tickers`.
    pub fn get_price_table<S: AsRef<str>>(
        &self,
        tickers: &[S],
        period: &str,
        interval: &str,
    ) -> Result<PriceTable, AcquireError> {
        self.acquire(tickers, period, interval).map(|a| a.table)
    }

    /// Fetch a close-price table for `tickers`, reporting its provenance.
    pub fn acquire<S: AsRef<str>>(
        &self,
        tickers: &[S],
        period: &str,
        interval: &str,
    ) -> Result<Acquisition, AcquireError> {
        let tickers = canonical_tickers(tickers);
        if tickers.is_empty() {
            return Err(AcquireError::NoTickers);
        }

        let cache_key = CacheKey::build(self.config.provider_mode, &tickers, period, interval);
        let ttl = self.config.cache_ttl();
        if let Some(table) = self.cache.read(&cache_key, EntryKind::Provider, ttl) {
            return Ok(Acquisition {
                table,
                source: DataSource::Cache,
                cache_key,
                failures: Vec::new(),
            });
        }
        if self.synthetic.is_some() {
            if let Some(table) = self.cache.read(&cache_key, EntryKind::Synthetic, ttl) {
                warn!(key = %cache_key, "serving cached synthetic prices");
                return Ok(Acquisition {
                    table,
                    source: DataSource::Synthetic,
                    cache_key,
                    failures: Vec::new(),
                });
            }
        }

        let mut failures = Vec::new();
        for provider in &self.providers {
            debug!(provider = provider.name(), tickers = ?tickers, %period, %interval, "fetching prices");
            match provider.fetch(&tickers, period, interval) {
                Ok(table) => {
                    info!(
                        provider = provider.name(),
                        rows = table.len(),
                        columns = table.columns().len(),
                        "fetched prices"
                    );
                    return Ok(self.finish(table, provider.source(), cache_key, failures));
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "provider failed, trying next");
                    failures.push(e);
                }
            }
        }

        if let Some(synthetic) = &self.synthetic {
            warn!(
                tickers = ?tickers,
                "all providers failed; generating synthetic prices"
            );
            match synthetic.fetch(&tickers, period, interval) {
                Ok(table) => {
                    return Ok(self.finish(table, synthetic.source(), cache_key, failures));
                }
                Err(e) => failures.push(e),
            }
        }

        Err(AcquireError::ExhaustedProviders { failures })
    }

    fn finish(
        &self,
        table: PriceTable,
        source: DataSource,
        cache_key: CacheKey,
        failures: Vec<ProviderError>,
    ) -> Acquisition {
        self.cache.write(&cache_key, EntryKind::of(source), &table);
        Acquisition {
            table,
            source,
            cache_key,
            failures,
        }
    }
}

/// Trim, uppercase, drop blanks and duplicates (first occurrence wins).
pub fn canonical_tickers<S: AsRef<str>>(tickers: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tickers.len());
    for ticker in tickers {
        let ticker = ticker.as_ref().trim().to_uppercase();
        if !ticker.is_empty() && !out.contains(&ticker) {
            out.push(ticker);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderMode;
    use crate::data::FetchFailure;
    use crate::table::{parse_timestamp, PricePoint};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    type Calls = Arc<AtomicUsize>;

    /// Provider that either serves a fixed close for every ticker or fails.
    struct StubProvider {
        name: &'static str,
        source: DataSource,
        close: Option<f64>,
        calls: Arc<AtomicUsize>,
    }

    impl StubProvider {
        fn ok(name: &'static str, source: DataSource, close: f64) -> (Box<dyn PriceProvider>, Calls) {
            Self::build(name, source, Some(close))
        }

        fn failing(name: &'static str, source: DataSource) -> (Box<dyn PriceProvider>, Calls) {
            Self::build(name, source, None)
        }

        fn build(
            name: &'static str,
            source: DataSource,
            close: Option<f64>,
        ) -> (Box<dyn PriceProvider>, Calls) {
            let calls = Arc::new(AtomicUsize::new(0));
            let stub: Box<dyn PriceProvider> = Box::new(Self {
                name,
                source,
                close,
                calls: Arc::clone(&calls),
            });
            (stub, calls)
        }
    }

    impl PriceProvider for StubProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn source(&self) -> DataSource {
            self.source
        }

        fn fetch(
            &self,
            tickers: &[String],
            _period: &str,
            _interval: &str,
        ) -> Result<PriceTable, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let close = self.close.ok_or_else(|| {
                ProviderError::new(
                    self.name,
                    FetchFailure::HttpStatus {
                        status: 503,
                        target: tickers.join(","),
                    },
                )
            })?;
            let day = parse_timestamp("2024-01-02").unwrap();
            let series: Vec<(String, Vec<PricePoint>)> = tickers
                .iter()
                .map(|t| (t.clone(), vec![(day, close)]))
                .collect();
            Ok(PriceTable::from_series(series).unwrap())
        }
    }

    fn config(dir: &tempfile::TempDir) -> FeedConfig {
        FeedConfig {
            cache_dir: dir.path().to_path_buf(),
            ..FeedConfig::default()
        }
    }

    #[test]
    fn empty_ticker_list_is_an_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let feed = PriceFeed::with_providers(config(&dir), vec![]);

        let empty: [&str; 0] = [];
        assert!(matches!(
            feed.get_price_table(&empty, "2y", "1d"),
            Err(AcquireError::NoTickers)
        ));
        assert!(matches!(
            feed.get_price_table(&["  ", ""], "2y", "1d"),
            Err(AcquireError::NoTickers)
        ));
    }

    #[test]
    fn primary_success_skips_secondary() {
        let dir = tempfile::tempdir().unwrap();
        let (yahoo, yahoo_calls) = StubProvider::ok("yahoo", DataSource::YahooFinance, 1.0);
        let (stooq, stooq_calls) = StubProvider::ok("stooq", DataSource::Stooq, 2.0);
        let feed = PriceFeed::with_providers(config(&dir), vec![yahoo, stooq]);

        let got = feed.acquire(&["aapl"], "1y", "1d").unwrap();

        assert_eq!(got.source, DataSource::YahooFinance);
        assert!(got.failures.is_empty());
        assert_eq!(got.table.column("AAPL").unwrap(), &[1.0]);
        assert_eq!(yahoo_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stooq_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn falls_back_to_secondary_with_one_recorded_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (yahoo, _) = StubProvider::failing("yahoo", DataSource::YahooFinance);
        let (stooq, _) = StubProvider::ok("stooq", DataSource::Stooq, 2.0);
        let feed = PriceFeed::with_providers(config(&dir), vec![yahoo, stooq]);

        let got = feed.acquire(&["AAPL", "MSFT"], "1y", "1d").unwrap();

        assert_eq!(got.source, DataSource::Stooq);
        assert_eq!(got.failures.len(), 1);
        assert_eq!(got.failures[0].provider, "yahoo");
        assert_eq!(got.table.column("MSFT").unwrap(), &[2.0]);
    }

    #[test]
    fn exhausted_providers_name_every_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (yahoo, _) = StubProvider::failing("yahoo", DataSource::YahooFinance);
        let (stooq, _) = StubProvider::failing("stooq", DataSource::Stooq);
        let feed = PriceFeed::with_providers(config(&dir), vec![yahoo, stooq]);

        let err = feed.get_price_table(&["AAPL"], "1y", "1d").unwrap_err();

        assert_eq!(err.failures().len(), 2);
        let message = err.to_string();
        assert!(message.starts_with("price fetch failed."));
        assert!(message.contains("yahoo: HTTP 503"));
        assert!(message.contains("stooq: HTTP 503"));
    }

    #[test]
    fn synthetic_fallback_when_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let (yahoo, _) = StubProvider::failing("yahoo", DataSource::YahooFinance);
        let (stooq, _) = StubProvider::failing("stooq", DataSource::Stooq);
        let feed = PriceFeed::with_providers(
            FeedConfig {
                allow_synthetic: true,
                ..config(&dir)
            },
            vec![yahoo, stooq],
        );

        let got = feed.acquire(&["SPY", "QQQ"], "1y", "1d").unwrap();

        assert_eq!(got.source, DataSource::Synthetic);
        assert_eq!(got.failures.len(), 2);
        assert_eq!(got.table.tickers().collect::<Vec<_>>(), vec!["SPY", "QQQ"]);
    }

    #[test]
    fn synthetic_never_replaces_a_real_result() {
        let dir = tempfile::tempdir().unwrap();
        let (stooq, _) = StubProvider::ok("stooq", DataSource::Stooq, 2.0);
        let feed = PriceFeed::with_providers(
            FeedConfig {
                allow_synthetic: true,
                ..config(&dir)
            },
            vec![stooq],
        );

        let got = feed.acquire(&["SPY"], "1y", "1d").unwrap();
        assert_eq!(got.source, DataSource::Stooq);
    }

    #[test]
    fn second_request_is_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let (yahoo, calls) = StubProvider::ok("yahoo", DataSource::YahooFinance, 1.5);
        let feed = PriceFeed::with_providers(config(&dir), vec![yahoo]);

        let first = feed.acquire(&["MSFT", "aapl"], "2y", "1d").unwrap();
        let second = feed.acquire(&["AAPL", "msft"], "2y", "1d").unwrap();

        assert_eq!(first.source, DataSource::YahooFinance);
        assert_eq!(second.source, DataSource::Cache);
        assert_eq!(first.cache_key, second.cache_key);
        assert_eq!(second.table.column("AAPL").unwrap(), &[1.5]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cached_synthetic_prices_need_synthetic_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let failing = || {
            let (yahoo, _) = StubProvider::failing("yahoo", DataSource::YahooFinance);
            let (stooq, _) = StubProvider::failing("stooq", DataSource::Stooq);
            vec![yahoo, stooq]
        };
        let with_synthetic = FeedConfig {
            allow_synthetic: true,
            ..config(&dir)
        };

        let first = PriceFeed::with_providers(with_synthetic.clone(), failing())
            .acquire(&["AAPL"], "1y", "1d")
            .unwrap();
        assert_eq!(first.source, DataSource::Synthetic);

        let strict = PriceFeed::with_providers(config(&dir), failing());
        let err = strict.acquire(&["AAPL"], "1y", "1d").unwrap_err();
        assert!(matches!(err, AcquireError::ExhaustedProviders { .. }));
        assert_eq!(err.failures().len(), 2);

        let (yahoo, calls) = StubProvider::failing("yahoo", DataSource::YahooFinance);
        let again = PriceFeed::with_providers(with_synthetic, vec![yahoo])
            .acquire(&["AAPL"], "1y", "1d")
            .unwrap();
        assert_eq!(again.source, DataSource::Synthetic);
        assert_eq!(again.table.column("AAPL"), first.table.column("AAPL"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn real_prices_win_over_cached_synthetic() {
        let dir = tempfile::tempdir().unwrap();
        let with_synthetic = FeedConfig {
            allow_synthetic: true,
            ..config(&dir)
        };
        let (down, _) = StubProvider::failing("yahoo", DataSource::YahooFinance);
        PriceFeed::with_providers(with_synthetic.clone(), vec![down])
            .acquire(&["AAPL"], "1y", "1d")
            .unwrap();

        let (stooq, _) = StubProvider::ok("stooq", DataSource::Stooq, 2.0);
        let strict = PriceFeed::with_providers(config(&dir), vec![stooq]);
        let real = strict.acquire(&["AAPL"], "1y", "1d").unwrap();
        assert_eq!(real.source, DataSource::Stooq);

        let (unused, _) = StubProvider::failing("yahoo", DataSource::YahooFinance);
        let cached = PriceFeed::with_providers(with_synthetic, vec![unused])
            .acquire(&["AAPL"], "1y", "1d")
            .unwrap();
        assert_eq!(cached.source, DataSource::Cache);
        assert_eq!(cached.table.column("AAPL").unwrap(), &[2.0]);
    }

    #[test]
    fn expired_cache_is_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let (yahoo, calls) = StubProvider::ok("yahoo", DataSource::YahooFinance, 1.5);
        let feed = PriceFeed::with_providers(
            FeedConfig {
                cache_ttl_secs: 0,
                ..config(&dir)
            },
            vec![yahoo],
        );

        feed.acquire(&["AAPL"], "2y", "1d").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let again = feed.acquire(&["AAPL"], "2y", "1d").unwrap();

        assert_eq!(again.source, DataSource::YahooFinance);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cache_key_uses_mode_not_provider() {
        let dir = tempfile::tempdir().unwrap();
        let (stooq, _) = StubProvider::ok("stooq", DataSource::Stooq, 2.0);
        let feed = PriceFeed::with_providers(config(&dir), vec![stooq]);

        let got = feed.acquire(&["SPY"], "1y", "1d").unwrap();
        assert_eq!(
            got.cache_key,
            CacheKey::build(ProviderMode::Auto, &["SPY"], "1y", "1d")
        );
    }

    #[test]
    fn mode_selects_real_providers() {
        let dir = tempfile::tempdir().unwrap();
        let auto = PriceFeed::new(config(&dir)).unwrap();
        assert_eq!(auto.provider_names(), vec!["yahoo", "stooq"]);

        let pinned = PriceFeed::new(FeedConfig {
            provider_mode: ProviderMode::Stooq,
            ..config(&dir)
        })
        .unwrap();
        assert_eq!(pinned.provider_names(), vec!["stooq"]);
    }

    #[test]
    fn canonical_tickers_dedupes_in_order() {
        assert_eq!(
            canonical_tickers(&[" msft", "AAPL", "", "Msft"]),
            vec!["MSFT".to_string(), "AAPL".to_string()]
        );
    }
}
