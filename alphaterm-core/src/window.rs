//! Period tokens ("2y", "15d", "max") resolved to lookback windows.
//!
//! Lookbacks are calendar days padded past the nominal span so weekends and
//! holidays never leave a window short of trading days. Resolution never
//! fails: anything unrecognized gets the two-year window.

use chrono::{DateTime, Duration, Utc};

/// Period used when a token is missing or malformed.
pub const DEFAULT_PERIOD: &str = "2y";

const DEFAULT_LOOKBACK_DAYS: u32 = 760;

const KNOWN_PERIODS: [(&str, u32); 9] = [
    ("5d", 7),
    ("1mo", 35),
    ("3mo", 110),
    ("6mo", 220),
    ("1y", 380),
    (DEFAULT_PERIOD, DEFAULT_LOOKBACK_DAYS),
    ("5y", 1900),
    ("10y", 3800),
    ("max", 6000),
];

/// Resolve a period token to a lookback in calendar days.
///
/// Known tokens use a fixed table. Other `<N>d`, `<N>mo` and `<N>y` tokens
/// get unit-specific padding: `N + 5`, `N * 31 + 10`, `N * 365 + 15`.
pub fn lookback_days(period: &str) -> u32 {
    let token = period.trim().to_ascii_lowercase();

    if let Some(&(_, days)) = KNOWN_PERIODS.iter().find(|(name, _)| *name == token) {
        return days;
    }

    parse_adhoc(&token).unwrap_or(DEFAULT_LOOKBACK_DAYS)
}

/// First instant of the lookback window ending at `now`.
pub fn window_start(period: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(i64::from(lookback_days(period)))
}

/// True for sub-daily interval tokens (`1m`, `15m`, `1h`, ...). Monthly
/// tokens end in `mo` and are not intraday.
pub fn is_intraday(interval: &str) -> bool {
    let interval = interval.trim().to_ascii_lowercase();
    interval.ends_with('m') || interval.ends_with('h')
}

fn parse_adhoc(token: &str) -> Option<u32> {
    let split = token.find(|c: char| !c.is_ascii_digit())?;
    if split == 0 {
        return None;
    }
    let (count, unit) = token.split_at(split);
    let count: u32 = count.parse().ok()?;

    match unit {
        "d" => count.checked_add(5),
        "mo" => count.checked_mul(31)?.checked_add(10),
        "y" => count.checked_mul(365)?.checked_add(15),
        _ => None,
    }
}
