//! Engine configuration.

use crate::error::{CoreError, CoreResult};

/// Environment variable holding the maximum segment size in megabytes.
pub const ENV_MAX_SEGMENT_SIZE_MB: &str = "TIDEDB_MAX_SEGMENT_SIZE_MB";
/// Environment variable controlling sync-on-write.
pub const ENV_SYNC_ON_WRITE: &str = "TIDEDB_SYNC_ON_WRITE";
/// Environment variable enabling per-operation debug events.
pub const ENV_DEBUG: &str = "TIDEDB_DEBUG";

const MEGABYTE: u64 = 1024 * 1024;

/// Configuration for opening an engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum size of a segment file before a new one is started.
    pub max_segment_size: u64,

    /// Whether every write is synced to disk before it returns.
    pub sync_on_write: bool,

    /// Emit a `tracing` debug event for every operation.
    pub debug: bool,

    /// Schedule a background compaction once tombstones exceed this
    /// percentage of live keys.
    pub compaction_threshold_percent: u64,

    /// Whether writes may schedule background compaction at all.
    pub auto_compact: bool,

    /// Capacity of each segment's write queue.
    pub writer_queue_depth: usize,

    /// Default worker count for iteration helpers.
    pub iterate_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_segment_size: 128 * MEGABYTE,
            sync_on_write: true,
            debug: false,
            compaction_threshold_percent: 10,
            auto_compact: true,
            writer_queue_depth: 1024,
            iterate_workers: 4,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a configuration from the process environment.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if a variable is set to a value
    /// that cannot be parsed.
    pub fn from_env() -> CoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    ///
    /// [`Config::from_env`] is this function over `std::env::var`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] on unparseable values.
    pub fn from_lookup<F>(lookup: F) -> CoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_MAX_SEGMENT_SIZE_MB) {
            let megabytes: u64 = raw.trim().parse().map_err(|_| {
                CoreError::invalid_config(format!(
                    "{ENV_MAX_SEGMENT_SIZE_MB}={raw} is not a number"
                ))
            })?;
            if megabytes == 0 {
                return Err(CoreError::invalid_config(format!(
                    "{ENV_MAX_SEGMENT_SIZE_MB} must be greater than zero"
                )));
            }
            config.max_segment_size = megabytes.saturating_mul(MEGABYTE);
        }

        if let Some(raw) = lookup(ENV_SYNC_ON_WRITE) {
            config.sync_on_write = parse_flag(ENV_SYNC_ON_WRITE, &raw)?;
        }

        if let Some(raw) = lookup(ENV_DEBUG) {
            config.debug = parse_flag(ENV_DEBUG, &raw)?;
        }

        Ok(config)
    }

    /// Sets the maximum segment size in bytes.
    #[must_use]
    pub const fn max_segment_size(mut self, size: u64) -> Self {
        self.max_segment_size = size;
        self
    }

    /// Sets whether to sync on every write.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets the debug event toggle.
    #[must_use]
    pub const fn debug(mut self, value: bool) -> Self {
        self.debug = value;
        self
    }

    /// Sets the tombstone percentage that triggers compaction.
    #[must_use]
    pub const fn compaction_threshold_percent(mut self, percent: u64) -> Self {
        self.compaction_threshold_percent = percent;
        self
    }

    /// Enables or disables automatic background compaction.
    #[must_use]
    pub const fn auto_compact(mut self, value: bool) -> Self {
        self.auto_compact = value;
        self
    }

    /// Sets each segment's write queue capacity.
    #[must_use]
    pub const fn writer_queue_depth(mut self, depth: usize) -> Self {
        self.writer_queue_depth = depth;
        self
    }

    /// Sets the default iteration worker count.
    #[must_use]
    pub const fn iterate_workers(mut self, workers: usize) -> Self {
        self.iterate_workers = workers;
        self
    }

    /// Checks the values an engine depends on.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for a zero segment size or queue
    /// depth.
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_segment_size == 0 {
            return Err(CoreError::invalid_config("max_segment_size must be greater than zero"));
        }
        if self.writer_queue_depth == 0 {
            return Err(CoreError::invalid_config("writer_queue_depth must be greater than zero"));
        }
        Ok(())
    }
}

fn parse_flag(key: &str, raw: &str) -> CoreResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(CoreError::invalid_config(format!(
            "{key}={raw} is not a boolean"
        ))),
    }
}
