//! Time-indexed close-price table.
//!
//! Rows are UTC timestamps, strictly ascending and unique. Columns are
//! uppercase tickers aligned to the shared index. A ticker with no observation
//! on a date holds NaN there (no forward-fill), but no row is NaN across every
//! column and no column is NaN across every row.

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::io;
use thiserror::Error;

/// Header of the timestamp column in the CSV form of a table.
pub const DATE_COLUMN: &str = "Date";

#[derive(Debug, Error)]
pub enum TableError {
    #[error("price table has no usable prices")]
    Empty,

    #[error("column '{ticker}' has {actual} values but the index has {expected} rows")]
    LengthMismatch {
        ticker: String,
        expected: usize,
        actual: usize,
    },

    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),

    #[error("first CSV column must be '{DATE_COLUMN}'")]
    MissingDateColumn,

    #[error("row {row}: unparseable timestamp '{value}'")]
    BadTimestamp { row: usize, value: String },

    #[error("row {row}: unparseable price '{value}' for {ticker}")]
    BadValue {
        row: usize,
        ticker: String,
        value: String,
    },

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("io: {0}")]
    Io(#[from] io::Error),
}

/// One ticker's close prices, aligned to the table index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceColumn {
    pub ticker: String,
    pub values: Vec<f64>,
}

/// A dated observation for a single ticker.
pub type PricePoint = (DateTime<Utc>, f64);

/// Close prices for a set of tickers on a common, ascending UTC timeline.
#[derive(Debug, Clone, Serialize)]
pub struct PriceTable {
    index: Vec<DateTime<Utc>>,
    columns: Vec<PriceColumn>,
}

impl PriceTable {
    /// Build a table from per-ticker series.
    ///
    /// The index is the union of every series' timestamps. Tickers are
    /// uppercased. When a series repeats a timestamp the first finite value wins.
    pub fn from_series<I>(series: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = (String, Vec<PricePoint>)>,
    {
        let series: Vec<(String, Vec<PricePoint>)> = series.into_iter().collect();

        let mut all_dates = BTreeSet::new();
        for (_, points) in &series {
            all_dates.extend(points.iter().map(|(ts, _)| *ts));
        }
        let index: Vec<DateTime<Utc>> = all_dates.into_iter().collect();
        let position: HashMap<DateTime<Utc>, usize> =
            index.iter().enumerate().map(|(i, ts)| (*ts, i)).collect();

        let mut columns = Vec::with_capacity(series.len());
        for (ticker, points) in series {
            let mut values = vec![f64::NAN; index.len()];
            for (ts, value) in points {
                if let Some(&row) = position.get(&ts) {
                    if !is_present(values[row]) {
                        values[row] = value;
                    }
                }
            }
            columns.push(PriceColumn {
                ticker: ticker.trim().to_uppercase(),
                values,
            });
        }

        Self::from_columns(index, columns)
    }

    /// Build a table from an index and columns of equal length, normalizing it.
    ///
    /// Rows are stably sorted by timestamp and duplicate timestamps keep their
    /// first occurrence. All-NaN columns and then all-NaN rows are dropped.
    pub fn from_columns(
        index: Vec<DateTime<Utc>>,
        columns: Vec<PriceColumn>,
    ) -> Result<Self, TableError> {
        let mut seen = HashSet::new();
        for column in &columns {
            if column.values.len() != index.len() {
                return Err(TableError::LengthMismatch {
                    ticker: column.ticker.clone(),
                    expected: index.len(),
                    actual: column.values.len(),
                });
            }
            if !seen.insert(column.ticker.as_str()) {
                return Err(TableError::DuplicateColumn(column.ticker.clone()));
            }
        }

        let mut order: Vec<usize> = (0..index.len()).collect();
        order.sort_by_key(|&i| index[i]);
        order.dedup_by_key(|i| index[*i]);

        let columns: Vec<PriceColumn> = columns
            .into_iter()
            .filter(|c| order.iter().any(|&i| is_present(c.values[i])))
            .collect();
        let rows: Vec<usize> = order
            .into_iter()
            .filter(|&i| columns.iter().any(|c| is_present(c.values[i])))
            .collect();

        if columns.is_empty() || rows.is_empty() {
            return Err(TableError::Empty);
        }

        Ok(Self {
            index: rows.iter().map(|&i| index[i]).collect(),
            columns: columns
                .into_iter()
                .map(|c| PriceColumn {
                    values: rows.iter().map(|&i| c.values[i]).collect(),
                    ticker: c.ticker,
                })
                .collect(),
        })
    }

    /// Collapse every timestamp to UTC midnight of its calendar date.
    ///
    /// Used for daily-or-coarser data so that providers stamping bars at the
    /// session open and providers emitting bare dates share one calendar.
    pub fn truncated_to_days(self) -> Result<Self, TableError> {
        let index = self
            .index
            .iter()
            .map(|ts| midnight(ts.date_naive()))
            .collect();
        Self::from_columns(index, self.columns)
    }

    pub fn index(&self) -> &[DateTime<Utc>] {
        &self.index
    }

    pub fn columns(&self) -> &[PriceColumn] {
        &self.columns
    }

    /// Ticker symbols in column order.
    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.ticker.as_str())
    }

    /// Close prices for a ticker (case-insensitive lookup).
    pub fn column(&self, ticker: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|c| c.ticker.eq_ignore_ascii_case(ticker.trim()))
            .map(|c| c.values.as_slice())
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Always false for a constructed table; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.index.first().copied()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.index.last().copied()
    }

    /// Write the table as CSV: `Date,<T1>,<T2>,...`, RFC 3339 UTC timestamps,
    /// empty cells for missing prices.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<(), TableError> {
        let mut wtr = csv::Writer::from_writer(writer);

        let mut header = Vec::with_capacity(self.columns.len() + 1);
        header.push(DATE_COLUMN);
        header.extend(self.tickers());
        wtr.write_record(&header)?;

        for (row, ts) in self.index.iter().enumerate() {
            let mut record = Vec::with_capacity(self.columns.len() + 1);
            record.push(ts.to_rfc3339_opts(SecondsFormat::Secs, true));
            for column in &self.columns {
                let value = column.values[row];
                record.push(if is_present(value) {
                    value.to_string()
                } else {
                    String::new()
                });
            }
            wtr.write_record(&record)?;
        }

        wtr.flush()?;
        Ok(())
    }

    /// Read a table written by [`PriceTable::write_csv`]. The result is
    /// re-normalized, so row order in the input does not matter.
    pub fn read_csv<R: io::Read>(reader: R) -> Result<Self, TableError> {
        let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);

        let headers = rdr.headers()?.clone();
        let mut names = headers.iter();
        if names.next().map(str::trim) != Some(DATE_COLUMN) {
            return Err(TableError::MissingDateColumn);
        }
        let tickers: Vec<String> = names.map(|t| t.trim().to_uppercase()).collect();

        let mut index = Vec::new();
        let mut values: Vec<Vec<f64>> = vec![Vec::new(); tickers.len()];

        for (row, record) in rdr.records().enumerate() {
            let record = record?;
            let raw_ts = record.get(0).unwrap_or_default();
            let ts = parse_timestamp(raw_ts).ok_or_else(|| TableError::BadTimestamp {
                row,
                value: raw_ts.to_string(),
            })?;
            index.push(ts);

            for (col, ticker) in tickers.iter().enumerate() {
                let raw = record.get(col + 1).unwrap_or_default();
                let value = parse_price(raw).ok_or_else(|| TableError::BadValue {
                    row,
                    ticker: ticker.clone(),
                    value: raw.to_string(),
                })?;
                values[col].push(value);
            }
        }

        let columns = tickers
            .into_iter()
            .zip(values)
            .map(|(ticker, values)| PriceColumn { ticker, values })
            .collect();
        Self::from_columns(index, columns)
    }
}

fn is_present(value: f64) -> bool {
    value.is_finite()
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Parse a cell as a price. Empty cells and NaN spellings are missing values.
fn parse_price(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
        return Some(f64::NAN);
    }
    raw.parse().ok()
}

/// Parse a timestamp in any of the shapes that show up in price files:
/// RFC 3339, `YYYY-MM-DD HH:MM:SS+00:00`, or a bare `YYYY-MM-DD` date
/// (interpreted as UTC midnight).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().map(midnight)
}
