//! Yahoo Finance batch provider (primary).
//!
//! One spark request covers every ticker. The endpoint answers in one of two
//! layouts: a ticker-keyed `spark` envelope (the usual multi-ticker shape) or
//! a flat single-series `chart` envelope. Both are accepted; a flat answer is
//! only attributable when exactly one ticker was requested.
//!
//! Yahoo Finance has no official API and is subject to unannounced format
//! changes and blocking, which is why it sits in front of a fallback chain.

use super::provider::{
    http_client, transport_failure, DataSource, FetchFailure, PriceProvider, ProviderError,
};
use crate::config::FeedConfig;
use crate::table::{PricePoint, PriceTable};
use crate::window::is_intraday;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const NAME: &str = "yahoo";
const SPARK_PATH: &str = "/v7/finance/spark";

/// Longest server-requested wait honored between attempts.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);
/// Backoff stops doubling after this many retries.
const MAX_DOUBLINGS: u32 = 6;

/// Batch response: ticker-keyed or flat.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BatchResponse {
    Keyed { spark: SparkEnvelope },
    Flat { chart: ChartEnvelope },
}

#[derive(Debug, Deserialize)]
struct SparkEnvelope {
    result: Option<Vec<SparkResult>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct SparkResult {
    symbol: String,
    #[serde(default)]
    response: Vec<ChartData>,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    result: Option<Vec<ChartData>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    close: Option<Vec<Option<f64>>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

/// Yahoo Finance batch provider.
pub struct YahooProvider {
    client: reqwest::blocking::Client,
    base_url: String,
    max_retries: u32,
    base_delay: Duration,
}

impl YahooProvider {
    pub fn new(config: &FeedConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http_client(config.http_timeout())?,
            base_url: config.yahoo_base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(500),
        })
    }

    /// Query parameters of the spark request for a batch of tickers.
    fn spark_query(
        tickers: &[String],
        period: &str,
        interval: &str,
    ) -> Vec<(&'static str, String)> {
        vec![
            ("symbols", tickers.join(",")),
            ("range", period.trim().to_ascii_lowercase()),
            ("interval", interval.trim().to_ascii_lowercase()),
            ("includeAdjustedClose", "true".into()),
            ("includePrePost", "false".into()),
        ]
    }

    /// Exponential backoff before retry `attempt` (1-based).
    fn backoff(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(MAX_DOUBLINGS);
        self.base_delay.saturating_mul(1u32 << doublings)
    }

    /// Execute the batch request with retry on transient failures.
    ///
    /// A 429 with a `Retry-After` header waits that long (capped at
    /// [`MAX_RETRY_AFTER`]) instead of the exponential backoff.
    fn fetch_with_retry(
        &self,
        query: &[(&'static str, String)],
        target: &str,
    ) -> Result<BatchResponse, FetchFailure> {
        let url = format!("{}{SPARK_PATH}", self.base_url);
        let mut last_error = None;
        let mut requested_wait: Option<Duration> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = requested_wait
                    .take()
                    .unwrap_or_else(|| self.backoff(attempt));
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying yahoo request");
                std::thread::sleep(delay);
            }

            match self.client.get(&url).query(query).send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = resp
                            .headers()
                            .get(reqwest::header::RETRY_AFTER)
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.trim().parse::<u64>().ok());
                        requested_wait =
                            retry_after.map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER));
                        last_error = Some(FetchFailure::RateLimited {
                            retry_after_secs: retry_after,
                        });
                        continue;
                    }

                    if status.is_server_error() {
                        last_error = Some(FetchFailure::HttpStatus {
                            status: status.as_u16(),
                            target: target.to_string(),
                        });
                        continue;
                    }

                    if !status.is_success() {
                        return Err(FetchFailure::HttpStatus {
                            status: status.as_u16(),
                            target: target.to_string(),
                        });
                    }

                    let body = resp.text().map_err(|e| transport_failure(&e))?;
                    return serde_json::from_str::<BatchResponse>(&body).map_err(|e| {
                        let preview: String = body.chars().take(80).collect();
                        FetchFailure::ResponseFormatChanged(format!(
                            "failed to parse response for {target}: {e} (body starts {preview:?})"
                        ))
                    });
                }
                Err(e) => {
                    let failure = transport_failure(&e);
                    if e.is_connect() || e.is_timeout() {
                        last_error = Some(failure);
                        continue;
                    }
                    return Err(failure);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            FetchFailure::NetworkUnreachable("max retries exceeded".into())
        }))
    }
}

impl PriceProvider for YahooProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn source(&self) -> DataSource {
        DataSource::YahooFinance
    }

    fn fetch(
        &self,
        tickers: &[String],
        period: &str,
        interval: &str,
    ) -> Result<PriceTable, ProviderError> {
        let target = tickers.join(",");
        let query = Self::spark_query(tickers, period, interval);
        debug!(symbols = %target, %period, %interval, "requesting yahoo batch");

        self.fetch_with_retry(&query, &target)
            .and_then(|resp| build_table(tickers, resp, interval))
            .map_err(|reason| ProviderError::new(NAME, reason))
    }
}

/// Turn a decoded batch response into a normalized table.
fn build_table(
    tickers: &[String],
    resp: BatchResponse,
    interval: &str,
) -> Result<PriceTable, FetchFailure> {
    let series = extract_series(tickers, resp)?;
    if series.is_empty() {
        return Err(FetchFailure::EmptyResponse(tickers.join(",")));
    }

    let table = PriceTable::from_series(series)?;
    if is_intraday(interval) {
        Ok(table)
    } else {
        Ok(table.truncated_to_days()?)
    }
}

fn extract_series(
    tickers: &[String],
    resp: BatchResponse,
) -> Result<Vec<(String, Vec<PricePoint>)>, FetchFailure> {
    match resp {
        BatchResponse::Keyed { spark } => {
            let results = spark.result.ok_or_else(|| envelope_error(spark.error))?;
            let mut series = Vec::with_capacity(results.len());
            for result in results {
                let symbol = result.symbol.trim().to_uppercase();
                if !tickers.iter().any(|t| *t == symbol) {
                    debug!(%symbol, "ignoring unrequested symbol in yahoo response");
                    continue;
                }
                match result.response.into_iter().next() {
                    Some(data) => series.push((symbol, close_series(data)?)),
                    None => warn!(%symbol, "yahoo returned no series for symbol"),
                }
            }
            Ok(series)
        }
        BatchResponse::Flat { chart } => {
            let data = chart
                .result
                .ok_or_else(|| envelope_error(chart.error))?
                .into_iter()
                .next()
                .ok_or_else(|| FetchFailure::ResponseFormatChanged("result array is empty".into()))?;

            match tickers {
                [ticker] => Ok(vec![(ticker.clone(), close_series(data)?)]),
                _ => Err(FetchFailure::ResponseFormatChanged(format!(
                    "single-series layout returned for {} tickers",
                    tickers.len()
                ))),
            }
        }
    }
}

fn envelope_error(error: Option<ApiError>) -> FetchFailure {
    match error {
        Some(err) if err.code == "Not Found" => FetchFailure::EmptyResponse(err.description),
        Some(err) => FetchFailure::ResponseFormatChanged(format!("{}: {}", err.code, err.description)),
        None => FetchFailure::ResponseFormatChanged("empty result with no error".into()),
    }
}

/// Extract one ticker's closes, preferring adjusted close over raw close.
fn close_series(data: ChartData) -> Result<Vec<PricePoint>, FetchFailure> {
    let timestamps = data
        .timestamp
        .ok_or_else(|| FetchFailure::EmptyResponse("series without timestamps".into()))?;

    let adjusted = data
        .indicators
        .adjclose
        .and_then(|v| v.into_iter().next())
        .map(|a| a.adjclose);
    let raw = data
        .indicators
        .quote
        .into_iter()
        .next()
        .and_then(|q| q.close);
    let closes = adjusted.or(raw).ok_or(FetchFailure::MissingCloseField)?;

    let mut points = Vec::with_capacity(timestamps.len());
    for (ts, close) in timestamps.into_iter().zip(closes) {
        let Some(close) = close else {
            continue;
        };
        let ts: DateTime<Utc> = DateTime::from_timestamp(ts, 0).ok_or_else(|| {
            FetchFailure::ResponseFormatChanged(format!("invalid timestamp: {ts}"))
        })?;
        points.push((ts, close));
    }
    Ok(points)
}
