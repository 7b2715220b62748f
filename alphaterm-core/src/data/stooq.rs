//! Stooq flat-file provider (secondary).
//!
//! One CSV download per ticker (`Date,Open,High,Low,Close[,Volume]`), fetched
//! sequentially and joined column-wise. Any ticker failing fails the whole
//! attempt so the feed can move on to the next provider.

use super::provider::{
    http_client, transport_failure, DataSource, FetchFailure, PriceProvider, ProviderError,
};
use crate::config::FeedConfig;
use crate::table::{parse_timestamp, PricePoint, PriceTable};
use crate::window::window_start;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

const NAME: &str = "stooq";
const CSV_PATH: &str = "/q/d/l/";

/// Per-request timeout for Stooq downloads, independent of the primary's.
pub const STOOQ_TIMEOUT: Duration = Duration::from_secs(20);

/// Header prefix every valid Stooq download starts with.
pub const EXPECTED_HEADER: &str = "Date,Open,High,Low,Close";

/// Stooq provider.
pub struct StooqProvider {
    client: reqwest::blocking::Client,
    base_url: String,
    suffix: String,
}

impl StooqProvider {
    pub fn new(config: &FeedConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http_client(STOOQ_TIMEOUT)?,
            base_url: config.stooq_base_url.trim_end_matches('/').to_string(),
            suffix: config.stooq_suffix.trim().to_ascii_lowercase(),
        })
    }

    /// Stooq symbol for a ticker: dotted tickers pass through, bare ones get
    /// the default market suffix (`AAPL` -> `aapl.us`).
    pub fn symbol_for(&self, ticker: &str) -> String {
        let ticker = ticker.trim().to_ascii_lowercase();
        if ticker.contains('.') {
            ticker
        } else {
            format!("{ticker}.{}", self.suffix)
        }
    }

    fn fetch_one(
        &self,
        ticker: &str,
        interval: &str,
        start: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>, FetchFailure> {
        let symbol = self.symbol_for(ticker);
        debug!(%ticker, %symbol, "requesting stooq csv");

        let resp = self
            .client
            .get(format!("{}{CSV_PATH}", self.base_url))
            .query(&[("s", symbol.as_str()), ("i", interval_code(interval))])
            .send()
            .map_err(|e| transport_failure(&e))?;

        if resp.status() != reqwest::StatusCode::OK {
            return Err(FetchFailure::HttpStatus {
                status: resp.status().as_u16(),
                target: ticker.to_string(),
            });
        }

        let body = resp.text().map_err(|e| transport_failure(&e))?;
        parse_csv(ticker, &body, start)
    }
}

impl PriceProvider for StooqProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn source(&self) -> DataSource {
        DataSource::Stooq
    }

    fn fetch(
        &self,
        tickers: &[String],
        period: &str,
        interval: &str,
    ) -> Result<PriceTable, ProviderError> {
        let start = window_start(period, Utc::now());

        let mut series = Vec::with_capacity(tickers.len());
        for ticker in tickers {
            let points = self
                .fetch_one(ticker, interval, start)
                .map_err(|reason| ProviderError::new(NAME, reason))?;
            series.push((ticker.to_uppercase(), points));
        }

        PriceTable::from_series(series).map_err(|e| ProviderError::new(NAME, e.into()))
    }
}

/// Stooq sampling code: weekly and monthly are native, everything else is daily.
fn interval_code(interval: &str) -> &'static str {
    match interval.trim().to_ascii_lowercase().as_str() {
        "1wk" | "1w" => "w",
        "1mo" => "m",
        _ => "d",
    }
}

/// Parse one Stooq CSV body, keeping closes on or after `start`.
///
/// Rows with unparseable dates or closes are dropped rather than failing the
/// ticker; only an empty result is an error.
pub fn parse_csv(
    ticker: &str,
    body: &str,
    start: DateTime<Utc>,
) -> Result<Vec<PricePoint>, FetchFailure> {
    let text = body.trim();
    if text.is_empty() || !text.contains(EXPECTED_HEADER) {
        return Err(FetchFailure::ResponseFormatChanged(format!(
            "unexpected body for {ticker}"
        )));
    }

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = rdr
        .headers()
        .map_err(|e| FetchFailure::ResponseFormatChanged(format!("{ticker}: {e}")))?
        .clone();
    let position = |name: &str| headers.iter().position(|h| h.trim() == name);
    let (Some(date_col), Some(close_col)) = (position("Date"), position("Close")) else {
        return Err(FetchFailure::ResponseFormatChanged(format!(
            "missing columns for {ticker}"
        )));
    };

    let mut points = Vec::new();
    for record in rdr.records().flatten() {
        let Some(date) = record.get(date_col).and_then(parse_timestamp) else {
            continue;
        };
        if date < start {
            continue;
        }
        let Some(close) = record
            .get(close_col)
            .and_then(|c| c.trim().parse::<f64>().ok())
            .filter(|c| c.is_finite())
        else {
            continue;
        };
        points.push((date, close));
    }

    if points.is_empty() {
        return Err(FetchFailure::NoRowsInRange {
            ticker: ticker.to_uppercase(),
        });
    }
    Ok(points)
}
