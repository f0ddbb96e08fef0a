//! Typed configuration structs, one per collaborator, following the
//! `EngineConfig`/`WalConfig`-style layout of the rest of this crate's lineage.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for [`crate::store::Database::open`].
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the main database file. Required.
    pub db_path: PathBuf,
    /// Scratch path used while rewriting. Defaults to `db_path` + `.tmp`.
    pub tmp_path: Option<PathBuf>,
    /// Backup path used during the atomic swap. Defaults to `db_path` + `.bak`.
    pub bak_path: Option<PathBuf>,
    /// Size in bytes of each half of the read/write scratch buffer used by the
    /// rewrite engine.
    pub scratch_size: usize,
    /// Maximum length, in bytes, accepted for any length-prefixed string.
    pub string_cap: u16,
    /// How long a caller will wait to acquire the instance lock before giving up.
    pub lock_timeout: Duration,
    /// Write-ahead log configuration. `None` disables the WAL entirely; every
    /// mutation then goes straight through the rewrite engine.
    pub wal: Option<WalConfig>,
    /// Read cache configuration. `None` disables caching.
    pub cache: Option<CacheConfig>,
}

impl DbConfig {
    /// Start a configuration for the database file at `db_path`, with every other
    /// option defaulted (WAL on with its own defaults, cache off).
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            tmp_path: None,
            bak_path: None,
            scratch_size: 8 * 1024,
            string_cap: 4096,
            lock_timeout: Duration::from_secs(5),
            wal: Some(WalConfig::default()),
            cache: None,
        }
    }

    pub(crate) fn resolved_tmp_path(&self) -> PathBuf {
        self.tmp_path
            .clone()
            .unwrap_or_else(|| append_ext(&self.db_path, "tmp"))
    }

    pub(crate) fn resolved_bak_path(&self) -> PathBuf {
        self.bak_path
            .clone()
            .unwrap_or_else(|| append_ext(&self.db_path, "bak"))
    }

    pub(crate) fn resolved_wal_path(&self) -> PathBuf {
        self.wal
            .as_ref()
            .and_then(|w| w.wal_path.clone())
            .unwrap_or_else(|| append_ext(&self.db_path, "wal"))
    }
}

fn append_ext(path: &Path, ext: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

/// Write-ahead log thresholds and path override.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Explicit WAL path. Defaults to `db_path` + `.wal`.
    pub wal_path: Option<PathBuf>,
    /// Checkpoint is triggered once the WAL holds at least this many entries.
    pub max_entries: u32,
    /// Checkpoint is triggered once the WAL file reaches this size in bytes.
    pub max_size: u64,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            wal_path: None,
            max_entries: 100,
            max_size: 64 * 1024,
        }
    }
}

/// Bounded read-cache sizing.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Number of `(type, id)` slots held in the cache.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 16 }
    }
}
