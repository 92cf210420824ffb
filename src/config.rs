use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::storage::{FileStore, StorageError};

/// 5 MiB of serialized cache values.
pub const DEFAULT_CACHE_MAX_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_CACHE_VERSION: &str = "1";
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_PREDICTION_TTL_SECS: u64 = 6 * 60 * 60;

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Capacity, expiry and versioning for the cache layer.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Upper bound on the summed serialized size of cached values.
    pub max_size_bytes: usize,
    /// Applied when `set` is called without an explicit TTL. `None` never expires.
    pub default_ttl: Option<Duration>,
    /// Entries written under any other version are dropped on read.
    pub schema_version: String,
    /// Minimum time between startup sweeps.
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_CACHE_MAX_BYTES,
            default_ttl: Some(Duration::from_secs(DEFAULT_CACHE_TTL_SECS)),
            schema_version: DEFAULT_CACHE_VERSION.to_owned(),
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
        }
    }
}

impl CacheConfig {
    /// Load cache configuration from environment, falling back to defaults
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_size_bytes: env_parse("FLOWCAST_CACHE_MAX_BYTES").unwrap_or(defaults.max_size_bytes),
            default_ttl: env_parse::<u64>("FLOWCAST_CACHE_TTL_SECS")
                .map(|secs| (secs > 0).then(|| Duration::from_secs(secs)))
                .unwrap_or(defaults.default_ttl),
            schema_version: env::var("FLOWCAST_CACHE_VERSION").unwrap_or(defaults.schema_version),
            cleanup_interval: env_parse("FLOWCAST_CACHE_CLEANUP_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cleanup_interval),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Directory holding the store file; the platform data dir when unset.
    pub data_dir: Option<PathBuf>,
    /// How long a computed prediction stays cached.
    pub prediction_ttl: Duration,
    pub cache: CacheConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            prediction_ttl: Duration::from_secs(DEFAULT_PREDICTION_TTL_SECS),
            cache: CacheConfig::default(),
        }
    }
}

impl ServiceConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            data_dir: env::var_os("FLOWCAST_DATA_DIR").map(PathBuf::from),
            prediction_ttl: env_parse("FLOWCAST_PREDICTION_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_PREDICTION_TTL_SECS)),
            cache: CacheConfig::from_env(),
        }
    }

    /// Path of the store file this configuration points at.
    pub fn store_path(&self) -> Result<PathBuf, StorageError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.join("store.flowcast")),
            None => FileStore::default_path(),
        }
    }
}
