//! Synthetic price generator, the last link of the fallback chain.
//!
//! Produces a geometric random walk per ticker from a fixed seed, so offline
//! or blocked environments still get a usable (clearly fake) table. Tables
//! from here are tagged [`DataSource::Synthetic`].

use super::provider::{DataSource, PriceProvider, ProviderError};
use crate::table::{PricePoint, PriceTable};
use crate::window::lookback_days;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

const NAME: &str = "synthetic";

pub const START_PRICE: f64 = 100.0;
/// Daily log-return drift.
pub const DRIFT: f64 = 0.0003;
/// Daily log-return volatility.
pub const VOLATILITY: f64 = 0.02;
pub const MIN_DAYS: usize = 60;
pub const MAX_DAYS: usize = 1500;

/// Deterministic random-walk generator.
#[derive(Debug, Clone)]
pub struct SyntheticProvider {
    seed: u64,
}

impl SyntheticProvider {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Generate a table ending at `today`.
    ///
    /// One RNG stream is shared across tickers in request order, so the same
    /// seed and ticker list always reproduce the same prices.
    pub fn generate(
        &self,
        tickers: &[String],
        period: &str,
        today: NaiveDate,
    ) -> Result<PriceTable, ProviderError> {
        let days = (lookback_days(period) as usize).clamp(MIN_DAYS, MAX_DAYS);
        let calendar = business_days_ending(today, days);
        let mut rng = StdRng::seed_from_u64(self.seed);

        let series: Vec<(String, Vec<PricePoint>)> = tickers
            .iter()
            .map(|ticker| {
                let mut log_price = START_PRICE.ln();
                let points = calendar
                    .iter()
                    .map(|ts| {
                        let shock: f64 = rng.sample(StandardNormal);
                        log_price += DRIFT + VOLATILITY * shock;
                        (*ts, log_price.exp())
                    })
                    .collect();
                (ticker.to_uppercase(), points)
            })
            .collect();

        PriceTable::from_series(series).map_err(|e| ProviderError::new(NAME, e.into()))
    }
}

impl PriceProvider for SyntheticProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn source(&self) -> DataSource {
        DataSource::Synthetic
    }

    fn fetch(
        &self,
        tickers: &[String],
        period: &str,
        _interval: &str,
    ) -> Result<PriceTable, ProviderError> {
        self.generate(tickers, period, Utc::now().date_naive())
    }
}

/// The `count` weekdays ending on or before `end`, ascending, at UTC midnight.
fn business_days_ending(end: NaiveDate, count: usize) -> Vec<DateTime<Utc>> {
    let mut days = Vec::with_capacity(count);
    let mut current = end;
    while days.len() < count {
        if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
            days.push(current.and_time(NaiveTime::MIN).and_utc());
        }
        current -= Duration::days(1);
    }
    days.reverse();
    days
}
