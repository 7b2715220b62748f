//! Gzip-compressed CSV cache of price tables.
//!
//! Layout: `{cache_dir}/prices_{key}.csv.gz` for provider data and
//! `{cache_dir}/prices_{key}.synthetic.csv.gz` for generated data, so a
//! synthetic table can only ever answer a lookup that asks for one.
//!
//! - Atomic writes (temp file in the cache dir, renamed into place), so a
//!   reader never observes a half-written entry and the last writer wins
//! - TTL checked lazily on read against the file's modification time
//! - Every failure is soft: reads degrade to a miss, writes are logged and dropped

use super::key::CacheKey;
use super::provider::DataSource;
use crate::table::{PriceTable, TableError};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::fs;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, warn};

const FILE_PREFIX: &str = "prices_";
const FILE_SUFFIX: &str = ".csv.gz";
const SYNTHETIC_FILE_SUFFIX: &str = ".synthetic.csv.gz";

/// What produced a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Provider,
    Synthetic,
}

impl EntryKind {
    /// Kind of entry a table from `source` is stored as.
    pub fn of(source: DataSource) -> Self {
        match source {
            DataSource::Synthetic => EntryKind::Synthetic,
            _ => EntryKind::Provider,
        }
    }

    fn file_suffix(self) -> &'static str {
        match self {
            EntryKind::Provider => FILE_SUFFIX,
            EntryKind::Synthetic => SYNTHETIC_FILE_SUFFIX,
        }
    }

    /// Split a cache file name into its key and kind.
    fn parse_file_name(name: &str) -> Option<(&str, Self)> {
        let rest = name.strip_prefix(FILE_PREFIX)?;
        if let Some(key) = rest.strip_suffix(SYNTHETIC_FILE_SUFFIX) {
            return Some((key, EntryKind::Synthetic));
        }
        rest.strip_suffix(FILE_SUFFIX)
            .map(|key| (key, EntryKind::Provider))
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O: {0}")]
    Io(#[from] io::Error),

    #[error("cache entry codec: {0}")]
    Codec(#[from] TableError),
}

/// Outcome of a cache read. Only `Hit` carries a table; the feed treats every
/// other variant as absent.
#[derive(Debug)]
pub enum CacheLookup {
    Hit(PriceTable),
    Miss,
    Expired { age: Duration },
    Unreadable(CacheError),
}

impl CacheLookup {
    pub fn into_table(self) -> Option<PriceTable> {
        match self {
            CacheLookup::Hit(table) => Some(table),
            _ => None,
        }
    }
}

/// Summary of one cache file, for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryInfo {
    pub key: CacheKey,
    pub kind: EntryKind,
    pub path: PathBuf,
    pub bytes: u64,
    pub age_secs: u64,
}

/// The price-table cache.
#[derive(Debug, Clone)]
pub struct CacheStore {
    cache_dir: PathBuf,
}

impl CacheStore {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Root directory of the cache.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Path of the `kind` entry for `key`.
    pub fn entry_path(&self, key: &CacheKey, kind: EntryKind) -> PathBuf {
        self.cache_dir
            .join(format!("{FILE_PREFIX}{}{}", key.as_str(), kind.file_suffix()))
    }

    /// Read the `kind` entry for `key` if it is younger than `ttl`.
    pub fn read(&self, key: &CacheKey, kind: EntryKind, ttl: Duration) -> Option<PriceTable> {
        match self.lookup(key, kind, ttl) {
            CacheLookup::Hit(table) => {
                debug!(key = %key, ?kind, rows = table.len(), "price cache hit");
                Some(table)
            }
            CacheLookup::Miss => {
                debug!(key = %key, "price cache miss");
                None
            }
            CacheLookup::Expired { age } => {
                debug!(key = %key, age_secs = age.as_secs(), "price cache entry expired");
                None
            }
            CacheLookup::Unreadable(err) => {
                warn!(key = %key, error = %err, "ignoring unreadable price cache entry");
                None
            }
        }
    }

    /// Classify the `kind` entry for `key` as of now.
    pub fn lookup(&self, key: &CacheKey, kind: EntryKind, ttl: Duration) -> CacheLookup {
        self.lookup_at(key, kind, ttl, SystemTime::now())
    }

    /// Classify the `kind` entry for `key` as of `now`.
    pub fn lookup_at(
        &self,
        key: &CacheKey,
        kind: EntryKind,
        ttl: Duration,
        now: SystemTime,
    ) -> CacheLookup {
        let path = self.entry_path(key, kind);

        let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return CacheLookup::Miss,
            Err(e) => return CacheLookup::Unreadable(e.into()),
        };

        // A clock that moved backwards makes the entry look brand new.
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age > ttl {
            return CacheLookup::Expired { age };
        }

        match load_entry(&path) {
            Ok(table) => CacheLookup::Hit(table),
            Err(e) => CacheLookup::Unreadable(e),
        }
    }

    /// Persist `table` under `key`, logging and discarding any failure.
    ///
    /// Caching is an optimization; callers keep the table they already have.
    pub fn write(&self, key: &CacheKey, kind: EntryKind, table: &PriceTable) {
        match self.try_write(key, kind, table) {
            Ok(()) => debug!(key = %key, ?kind, rows = table.len(), "price cache written"),
            Err(e) => warn!(key = %key, error = %e, "price cache write failed"),
        }
    }

    /// Persist `table` as the `kind` entry for `key`, replacing any existing
    /// entry atomically.
    pub fn try_write(
        &self,
        key: &CacheKey,
        kind: EntryKind,
        table: &PriceTable,
    ) -> Result<(), CacheError> {
        fs::create_dir_all(&self.cache_dir)?;

        let tmp = tempfile::Builder::new()
            .prefix(".prices_")
            .suffix(".tmp")
            .tempfile_in(&self.cache_dir)?;

        let mut encoder = GzEncoder::new(tmp.as_file(), Compression::default());
        table.write_csv(&mut encoder)?;
        encoder.finish()?;
        tmp.as_file().sync_all()?;

        // Atomic rename; the temp file is removed if this fails.
        tmp.persist(self.entry_path(key, kind)).map_err(|e| e.error)?;
        Ok(())
    }

    /// List cache entries, oldest first. A missing cache dir is an empty cache.
    pub fn entries(&self) -> Result<Vec<CacheEntryInfo>, CacheError> {
        let dir = match fs::read_dir(&self.cache_dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let now = SystemTime::now();
        let mut entries = Vec::new();
        for entry in dir {
            let entry = entry?;
            let name = entry.file_name();
            let Some((key, kind)) = name.to_str().and_then(EntryKind::parse_file_name) else {
                continue;
            };

            let meta = entry.metadata()?;
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or(Duration::ZERO);
            entries.push(CacheEntryInfo {
                key: CacheKey::from_hex(key),
                kind,
                path: entry.path(),
                bytes: meta.len(),
                age_secs: age.as_secs(),
            });
        }

        entries.sort_by(|a, b| b.age_secs.cmp(&a.age_secs));
        Ok(entries)
    }
}

fn load_entry(path: &Path) -> Result<PriceTable, CacheError> {
    let file = fs::File::open(path)?;
    let table = PriceTable::read_csv(GzDecoder::new(BufReader::new(file)))?;
    Ok(table)
}
