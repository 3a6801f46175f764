//! Store Configuration
//!
//! Centralized configuration with sensible defaults, a builder, and an
//! environment loader for processes that configure themselves through
//! `LC_`-prefixed variables.

use crate::error::{Result, StoreError};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Prefix for every environment variable read by [`StoreConfig::from_env`].
pub const ENV_PREFIX: &str = "LC_";

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// When the persistence worker forces appended records to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// fsync after every appended record (safest, slowest)
    EveryAppend,

    /// fsync only on the periodic sync timer
    Periodic,
}

/// Configuration for a [`Store`](crate::storage::Store).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    // -------------------------------------------------------------------------
    // Layout
    // -------------------------------------------------------------------------
    /// Directory holding the log (and, by convention, uploaded files)
    pub data_dir: PathBuf,

    /// File name of the log inside `data_dir`
    pub log_file_name: String,

    // -------------------------------------------------------------------------
    // Durability queue
    // -------------------------------------------------------------------------
    /// Capacity of the bounded notification queue
    pub queue_capacity: usize,

    /// How long add/remove may wait on a full queue before dropping the
    /// notification
    pub enqueue_timeout: Duration,

    /// When appended records are fsynced
    pub sync_policy: SyncPolicy,

    /// Period of the background fsync timer
    pub sync_interval: Duration,

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------
    /// Period of the background compaction timer
    pub compact_interval: Duration,

    /// Logs smaller than this are not compacted
    pub compact_min_bytes: u64,

    /// Period of the background expiry timer
    pub expiry_interval: Duration,

    /// Items older than this are swept; `None` disables timed expiry
    pub max_age: Option<Duration>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./download"),
            log_file_name: crate::DEFAULT_LOG_FILE.to_string(),
            queue_capacity: 100,
            enqueue_timeout: Duration::from_secs(5),
            sync_policy: SyncPolicy::EveryAppend,
            sync_interval: Duration::from_secs(5),
            compact_interval: Duration::from_secs(60 * 60),
            compact_min_bytes: 64 * 1024,
            expiry_interval: Duration::from_secs(SECS_PER_DAY),
            max_age: Some(Duration::from_secs(30 * SECS_PER_DAY)),
        }
    }
}

impl StoreConfig {
    /// Create a new config builder
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    /// Full path of the log file.
    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(&self.log_file_name)
    }

    /// Checks values that would make the worker misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.log_file_name.trim().is_empty() {
            return Err(StoreError::Config("log file name cannot be empty".into()));
        }
        if self.queue_capacity == 0 {
            return Err(StoreError::Config("queue capacity must be positive".into()));
        }

        let intervals = [
            ("sync_interval", self.sync_interval),
            ("compact_interval", self.compact_interval),
            ("expiry_interval", self.expiry_interval),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return Err(StoreError::Config(format!("{} must be non-zero", name)));
            }
        }

        Ok(())
    }

    /// Loads configuration from `LC_*` environment variables.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `LC_DOWNLOAD_PATH` | `data_dir` |
    /// | `LC_MAX_AGE_DAYS` | `max_age` (`0` disables expiry) |
    /// | `LC_QUEUE_CAPACITY` | `queue_capacity` |
    /// | `LC_SYNC_INTERVAL_SECS` | `sync_interval` |
    /// | `LC_COMPACT_INTERVAL_SECS` | `compact_interval` |
    ///
    /// Missing variables keep their defaults. Invalid ones are reported and
    /// replaced by the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())
    }

    /// Same as [`StoreConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let mut config = defaults.clone();

        if let Some(path) = lookup("DOWNLOAD_PATH").filter(|p| !p.trim().is_empty()) {
            config.data_dir = PathBuf::from(path.trim());
        }

        let default_days = defaults.max_age.map(|d| d.as_secs() / SECS_PER_DAY).unwrap_or(0);
        config.max_age = match parse_or(&lookup, "MAX_AGE_DAYS", default_days) {
            0 => None,
            days => match days_to_duration(days) {
                Some(max_age) => Some(max_age),
                None => {
                    warn!(days, "{}MAX_AGE_DAYS is out of range, using default", ENV_PREFIX);
                    defaults.max_age
                }
            },
        };

        config.queue_capacity = parse_or(&lookup, "QUEUE_CAPACITY", defaults.queue_capacity);
        config.sync_interval = secs_or(&lookup, "SYNC_INTERVAL_SECS", defaults.sync_interval);
        config.compact_interval =
            secs_or(&lookup, "COMPACT_INTERVAL_SECS", defaults.compact_interval);

        if let Err(e) = config.validate() {
            warn!(error = %e, "Configuration validation failed, using defaults for invalid fields");
            if config.queue_capacity == 0 {
                config.queue_capacity = defaults.queue_capacity;
            }
            if config.sync_interval.is_zero() {
                config.sync_interval = defaults.sync_interval;
            }
            if config.compact_interval.is_zero() {
                config.compact_interval = defaults.compact_interval;
            }
        }

        config
    }
}

/// Whole days as a [`Duration`], or `None` if the value overflows.
pub fn days_to_duration(days: u64) -> Option<Duration> {
    days.checked_mul(SECS_PER_DAY).map(Duration::from_secs)
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) if raw.trim().is_empty() => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(
                "Invalid value for {}{}: {:?}, using default: {}",
                ENV_PREFIX, key, raw, default
            );
            default
        }),
    }
}

fn secs_or<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    Duration::from_secs(parse_or(lookup, key, default.as_secs()))
}

/// Builder for [`StoreConfig`]
#[derive(Default)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    /// Set the data directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the log file name
    pub fn log_file_name(mut self, name: impl Into<String>) -> Self {
        self.config.log_file_name = name.into();
        self
    }

    /// Set the notification queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Set how long add/remove wait on a full queue
    pub fn enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.config.enqueue_timeout = timeout;
        self
    }

    pub fn sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.config.sync_policy = policy;
        self
    }

    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.config.sync_interval = interval;
        self
    }

    pub fn compact_interval(mut self, interval: Duration) -> Self {
        self.config.compact_interval = interval;
        self
    }

    /// Set the minimum log size worth compacting
    pub fn compact_min_bytes(mut self, bytes: u64) -> Self {
        self.config.compact_min_bytes = bytes;
        self
    }

    pub fn expiry_interval(mut self, interval: Duration) -> Self {
        self.config.expiry_interval = interval;
        self
    }

    /// Set the maximum item age (`None` disables timed expiry)
    pub fn max_age(mut self, max_age: Option<Duration>) -> Self {
        self.config.max_age = max_age;
        self
    }

    pub fn build(self) -> StoreConfig {
        self.config
    }
}
