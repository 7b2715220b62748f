//! AlphaTerm CLI — fetch price tables and inspect the price cache.
//!
//! Commands:
//! - `prices` — fetch an aligned close-price table and print it as CSV or JSON
//! - `window` — show the lookback window a period token resolves to
//! - `cache status` — list cached price tables with size and age
//!
//! Settings layer as: config file, then environment, then flags.

use alphaterm_core::data::{DataSource, EntryKind};
use alphaterm_core::window::{lookback_days, window_start, DEFAULT_PERIOD};
use alphaterm_core::{CacheStore, FeedConfig, PriceFeed, PriceTable, ProviderMode};
use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "alphaterm",
    about = "AlphaTerm CLI — close-price tables from Yahoo, Stooq or cache"
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache directory (overrides config and PRICE_CACHE_DIR).
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a close-price table for one or more tickers.
    Prices {
        /// Tickers to fetch (e.g., AAPL MSFT SPY).
        #[arg(required = true)]
        tickers: Vec<String>,

        /// Lookback period: 5d, 1mo, 3mo, 6mo, 1y, 2y, 5y, 10y, max.
        #[arg(long, default_value = DEFAULT_PERIOD)]
        period: String,

        /// Bar interval (e.g., 1d, 1wk, 1mo, 60m).
        #[arg(long, default_value = "1d")]
        interval: String,

        /// Provider mode: auto, yahoo, stooq.
        #[arg(long)]
        provider: Option<ProviderMode>,

        /// Fall back to seeded synthetic prices when every provider fails.
        #[arg(long, default_value_t = false)]
        synthetic: bool,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,
    },
    /// Show the date window a period token resolves to.
    Window {
        /// Period token (e.g., 1y, 6mo, 15d).
        period: String,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached price tables with size and age.
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Csv,
    Json,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Prices {
            tickers,
            period,
            interval,
            provider,
            synthetic,
            format,
        } => {
            let mut config = load_config(cli.config, cli.cache_dir)?;
            if let Some(mode) = provider {
                config.provider_mode = mode;
            }
            if synthetic {
                config.allow_synthetic = true;
            }
            run_prices(config, &tickers, &period, &interval, format)
        }
        Commands::Window { period } => run_window(&period),
        Commands::Cache { action } => match action {
            CacheAction::Status => run_cache_status(load_config(cli.config, cli.cache_dir)?),
        },
    }
}

/// Log to stderr so stdout stays clean for the table. `RUST_LOG` overrides `info`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<PathBuf>, cache_dir: Option<PathBuf>) -> Result<FeedConfig> {
    let base = match &path {
        Some(path) => FeedConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => FeedConfig::default(),
    };
    let mut config = base.with_env().context("reading environment overrides")?;
    if let Some(dir) = cache_dir {
        config.cache_dir = dir;
    }
    config.validate()?;
    debug!(
        provider = %config.provider_mode,
        cache_dir = %config.cache_dir.display(),
        allow_synthetic = config.allow_synthetic,
        "configuration loaded"
    );
    Ok(config)
}

fn run_prices(
    config: FeedConfig,
    tickers: &[String],
    period: &str,
    interval: &str,
    format: OutputFormat,
) -> Result<()> {
    let feed = PriceFeed::new(config)?;
    let acquisition = feed.acquire(tickers, period, interval)?;

    if acquisition.source == DataSource::Synthetic {
        warn!("prices are SYNTHETIC; do not use them for decisions");
    }
    eprintln!(
        "{} rows x {} tickers from {} (key {})",
        acquisition.table.len(),
        acquisition.table.columns().len(),
        acquisition.source,
        acquisition.cache_key
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_table(&mut out, &acquisition.table, format)?;
    out.flush()?;
    Ok(())
}

fn write_table<W: Write>(out: &mut W, table: &PriceTable, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Csv => table.write_csv(out)?,
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, table)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

fn run_window(period: &str) -> Result<()> {
    let now = Utc::now();
    println!("Period:   {period}");
    println!("Lookback: {} calendar days", lookback_days(period));
    println!("Start:    {}", window_start(period, now).date_naive());
    println!("End:      {}", now.date_naive());
    Ok(())
}

fn run_cache_status(config: FeedConfig) -> Result<()> {
    let cache = CacheStore::new(&config.cache_dir);
    let entries = cache.entries()?;

    if entries.is_empty() {
        println!("No cached price tables in {}", cache.cache_dir().display());
        return Ok(());
    }

    let ttl = config.cache_ttl_secs;
    println!("Cache: {}", cache.cache_dir().display());
    println!();
    println!("{:<18} {:<10} {:>10} {:>10}  Status", "Key", "Kind", "Size", "Age");
    println!("{}", "-".repeat(61));

    let mut total_size = 0;
    for entry in &entries {
        total_size += entry.bytes;
        let status = if entry.age_secs > ttl { "stale" } else { "fresh" };
        let kind = match entry.kind {
            EntryKind::Provider => "provider",
            EntryKind::Synthetic => "synthetic",
        };
        println!(
            "{:<18} {kind:<10} {:>10} {:>10}  {status}",
            entry.key.as_str(),
            format_size(entry.bytes),
            format_age(entry.age_secs)
        );
    }

    println!("{}", "-".repeat(61));
    println!("{} entries, {}", entries.len(), format_size(total_size));
    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

fn format_age(secs: u64) -> String {
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}
