//! Acquisition configuration.
//!
//! Everything the price feed needs is carried in an explicit [`FeedConfig`]
//! handed to the feed at construction. It can be loaded from TOML, layered
//! with environment variables, or built directly in tests.

use crate::data::provider::DataSource;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const ENV_PROVIDER: &str = "PRICE_PROVIDER";
pub const ENV_ALLOW_SYNTHETIC: &str = "ALLOW_MOCK_DATA";
pub const ENV_CACHE_DIR: &str = "PRICE_CACHE_DIR";
pub const ENV_CACHE_TTL_SECS: &str = "PRICE_CACHE_TTL_SECS";

/// Upper bound on `max_retries`.
pub const MAX_RETRIES: u32 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown price provider '{0}' (expected auto, yahoo or stooq)")]
    UnknownProvider(String),

    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Which real providers the feed may use.
///
/// `Auto` tries the primary (Yahoo) then the secondary (Stooq); the named
/// modes pin a single provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    #[default]
    Auto,
    #[serde(alias = "yfinance")]
    Yahoo,
    Stooq,
}

impl ProviderMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderMode::Auto => "auto",
            ProviderMode::Yahoo => "yahoo",
            ProviderMode::Stooq => "stooq",
        }
    }

    /// Whether a real provider takes part in this mode.
    pub fn includes(self, source: DataSource) -> bool {
        match (self, source) {
            (ProviderMode::Auto, DataSource::YahooFinance | DataSource::Stooq) => true,
            (ProviderMode::Yahoo, DataSource::YahooFinance) => true,
            (ProviderMode::Stooq, DataSource::Stooq) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ProviderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(ProviderMode::Auto),
            "yahoo" | "yfinance" => Ok(ProviderMode::Yahoo),
            "stooq" => Ok(ProviderMode::Stooq),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

/// Configuration for a [`crate::feed::PriceFeed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Which real providers to try.
    pub provider_mode: ProviderMode,

    /// Generate synthetic prices when every real provider fails.
    pub allow_synthetic: bool,

    /// Directory holding `prices_<key>.csv.gz` cache entries.
    pub cache_dir: PathBuf,

    /// Maximum age of a cache entry before it is treated as absent.
    pub cache_ttl_secs: u64,

    /// Per-request timeout for Yahoo calls. Stooq always uses 20 s.
    pub http_timeout_secs: u64,

    /// Retries for transient primary-provider failures (429, 5xx, network),
    /// at most [`MAX_RETRIES`].
    pub max_retries: u32,

    /// Market suffix appended to bare tickers for Stooq (`aapl` -> `aapl.us`).
    pub stooq_suffix: String,

    /// Seed for the synthetic random walk.
    pub synthetic_seed: u64,

    pub yahoo_base_url: String,
    pub stooq_base_url: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            provider_mode: ProviderMode::Auto,
            allow_synthetic: false,
            cache_dir: PathBuf::from(".cache"),
            cache_ttl_secs: 6 * 3600,
            http_timeout_secs: 20,
            max_retries: 2,
            stooq_suffix: "us".into(),
            synthetic_seed: 42,
            yahoo_base_url: "https://query1.finance.yahoo.com".into(),
            stooq_base_url: "https://stooq.com".into(),
        }
    }
}

impl FeedConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Parse a config from a TOML string. Missing keys take their defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env()
    }

    /// Overlay the process environment onto this config.
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_lookup(|key| std::env::var(key).ok())
    }

    /// Overlay variables from `lookup` onto this config. Unset variables leave
    /// the current value alone.
    pub fn with_lookup<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup(ENV_PROVIDER) {
            self.provider_mode = mode.parse()?;
        }
        if let Some(flag) = lookup(ENV_ALLOW_SYNTHETIC) {
            self.allow_synthetic = parse_flag(ENV_ALLOW_SYNTHETIC, &flag)?;
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR) {
            if !dir.trim().is_empty() {
                self.cache_dir = PathBuf::from(dir.trim());
            }
        }
        if let Some(ttl) = lookup(ENV_CACHE_TTL_SECS) {
            self.cache_ttl_secs = ttl.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_CACHE_TTL_SECS.into(),
                value: ttl.clone(),
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject settings that would make every request fail or hang.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "http_timeout_secs".into(),
                value: "0".into(),
            });
        }
        if self.max_retries > MAX_RETRIES {
            return Err(ConfigError::InvalidValue {
                key: "max_retries".into(),
                value: self.max_retries.to_string(),
            });
        }
        if self.stooq_suffix.trim().is_empty() || self.stooq_suffix.contains('.') {
            return Err(ConfigError::InvalidValue {
                key: "stooq_suffix".into(),
                value: self.stooq_suffix.clone(),
            });
        }
        Ok(())
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.into(),
            value: value.into(),
        }),
    }
}
