//! Cache strategy configuration
//!
//! A repository is built with one immutable [`CacheStrategyConfig`]. The
//! strategy varies along a few independent axes (read-through, how writes
//! reach the backing store, whether a near cache fronts the distributed
//! tier), so it is a plain value rather than a type per strategy.
//!
//! | Preset        | Read-through | Writes reach the store        |
//! |---------------|--------------|-------------------------------|
//! | `ReadOnly`    | no           | never (cache-only writes)     |
//! | `ReadThrough` | yes          | never (cache-only writes)     |
//! | `WriteThrough`| yes          | synchronously, inside `put`   |
//! | `WriteBehind` | yes          | asynchronously, batched       |

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::DomainError;

/// Named strategy presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheStrategy {
    ReadOnly,
    #[default]
    ReadThrough,
    WriteThrough,
    WriteBehind,
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheStrategy::ReadOnly => write!(f, "read_only"),
            CacheStrategy::ReadThrough => write!(f, "read_through"),
            CacheStrategy::WriteThrough => write!(f, "write_through"),
            CacheStrategy::WriteBehind => write!(f, "write_behind"),
        }
    }
}

impl FromStr for CacheStrategy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "read_only" | "readonly" => Ok(CacheStrategy::ReadOnly),
            "read_through" | "readthrough" => Ok(CacheStrategy::ReadThrough),
            "write_through" | "writethrough" => Ok(CacheStrategy::WriteThrough),
            "write_behind" | "writebehind" => Ok(CacheStrategy::WriteBehind),
            _ => Err(DomainError::configuration(format!(
                "Unknown cache strategy: {}. Valid strategies: read_only, read_through, write_through, write_behind",
                s
            ))),
        }
    }
}

/// Tuning for the write-behind flusher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBehindSettings {
    /// Buffer size that triggers an immediate flush
    pub batch_size: usize,
    /// Maximum age of the oldest pending write before a flush
    pub flush_interval: Duration,
    /// Failed flushes retried this many times before entries are dropped
    pub max_retries: u32,
    /// Bounded wait for draining the buffer at shutdown
    pub shutdown_timeout: Duration,
}

impl Default for WriteBehindSettings {
    fn default() -> Self {
        Self {
            batch_size: 200,
            flush_interval: Duration::from_millis(500),
            max_retries: 3,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl WriteBehindSettings {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Tuning for the process-local near cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NearCacheSettings {
    pub ttl: Duration,
    pub max_capacity: u64,
}

impl Default for NearCacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5),
            max_capacity: 10_000,
        }
    }
}

impl NearCacheSettings {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = capacity;
        self
    }
}

/// How `put`/`put_all` reach the backing store
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Cache-only writes
    #[default]
    None,
    /// Synchronous upsert before the call returns
    Through,
    /// Buffered upsert by a background flusher
    Behind(WriteBehindSettings),
}

/// Independent strategy switches, as found in configuration files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StrategyFlags {
    pub read_through: bool,
    pub write_through: bool,
    pub write_behind: bool,
    pub near_cache_enabled: bool,
}

/// Immutable strategy for one repository instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStrategyConfig {
    pub read_through: bool,
    pub write_mode: WriteMode,
    pub near_cache: Option<NearCacheSettings>,
    pub delete_from_backing_store_on_invalidate: bool,
    /// TTL of distributed entries
    pub ttl: Duration,
    /// TTL of "not found" tombstones; `None` disables negative caching
    pub negative_ttl: Option<Duration>,
    /// Upper bound for every distributed-cache and backing-store call
    pub operation_timeout: Duration,
    /// Keys deleted per round trip during pattern invalidation
    pub invalidation_batch_size: usize,
}

impl Default for CacheStrategyConfig {
    fn default() -> Self {
        Self::preset(CacheStrategy::default())
    }
}

impl CacheStrategyConfig {
    /// Builds the configuration for a named preset, near cache off
    pub fn preset(strategy: CacheStrategy) -> Self {
        let (read_through, write_mode) = match strategy {
            CacheStrategy::ReadOnly => (false, WriteMode::None),
            CacheStrategy::ReadThrough => (true, WriteMode::None),
            CacheStrategy::WriteThrough => (true, WriteMode::Through),
            CacheStrategy::WriteBehind => (true, WriteMode::Behind(WriteBehindSettings::default())),
        };

        Self {
            read_through,
            write_mode,
            near_cache: None,
            delete_from_backing_store_on_invalidate: false,
            ttl: Duration::from_secs(3600),
            negative_ttl: None,
            operation_timeout: Duration::from_secs(2),
            invalidation_batch_size: 100,
        }
    }

    pub fn read_only() -> Self {
        Self::preset(CacheStrategy::ReadOnly)
    }

    pub fn read_through() -> Self {
        Self::preset(CacheStrategy::ReadThrough)
    }

    pub fn write_through() -> Self {
        Self::preset(CacheStrategy::WriteThrough)
    }

    pub fn write_behind(settings: WriteBehindSettings) -> Self {
        Self::preset(CacheStrategy::WriteBehind).with_write_mode(WriteMode::Behind(settings))
    }

    /// Builds a configuration from independent switches
    ///
    /// Write-through and write-behind are mutually exclusive.
    pub fn from_flags(
        flags: StrategyFlags,
        write_behind: WriteBehindSettings,
        near_cache: NearCacheSettings,
    ) -> Result<Self, DomainError> {
        let write_mode = match (flags.write_through, flags.write_behind) {
            (true, true) => {
                return Err(DomainError::configuration(
                    "write_through and write_behind cannot both be enabled",
                ));
            }
            (true, false) => WriteMode::Through,
            (false, true) => WriteMode::Behind(write_behind),
            (false, false) => WriteMode::None,
        };

        let mut config = Self::preset(CacheStrategy::ReadOnly)
            .with_write_mode(write_mode)
            .with_read_through(flags.read_through);

        if flags.near_cache_enabled {
            config.near_cache = Some(near_cache);
        }

        Ok(config)
    }

    pub fn with_read_through(mut self, enabled: bool) -> Self {
        self.read_through = enabled;
        self
    }

    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    pub fn with_near_cache(mut self, settings: NearCacheSettings) -> Self {
        self.near_cache = Some(settings);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_negative_ttl(mut self, ttl: Duration) -> Self {
        self.negative_ttl = Some(ttl);
        self
    }

    pub fn with_delete_on_invalidate(mut self, enabled: bool) -> Self {
        self.delete_from_backing_store_on_invalidate = enabled;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_invalidation_batch_size(mut self, size: usize) -> Self {
        self.invalidation_batch_size = size;
        self
    }

    pub fn write_behind_settings(&self) -> Option<&WriteBehindSettings> {
        match &self.write_mode {
            WriteMode::Behind(settings) => Some(settings),
            _ => None,
        }
    }

    pub fn is_write_through(&self) -> bool {
        matches!(self.write_mode, WriteMode::Through)
    }

    /// Short label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match (&self.write_mode, self.read_through) {
            (WriteMode::Through, _) => "write_through",
            (WriteMode::Behind(_), _) => "write_behind",
            (WriteMode::None, true) => "read_through",
            (WriteMode::None, false) => "read_only",
        }
    }

    /// Rejects values that cannot be honoured at runtime
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.ttl.is_zero() {
            return Err(DomainError::configuration("ttl must be greater than 0"));
        }

        if self.operation_timeout.is_zero() {
            return Err(DomainError::configuration(
                "operation_timeout must be greater than 0",
            ));
        }

        if self.invalidation_batch_size == 0 {
            return Err(DomainError::configuration(
                "invalidation_batch_size must be greater than 0",
            ));
        }

        if matches!(self.negative_ttl, Some(ttl) if ttl.is_zero()) {
            return Err(DomainError::configuration(
                "negative_ttl must be greater than 0 when set",
            ));
        }

        if let Some(near) = &self.near_cache {
            if near.ttl.is_zero() {
                return Err(DomainError::configuration("near cache ttl must be greater than 0"));
            }
            if near.ttl > self.ttl {
                return Err(DomainError::configuration(
                    "near cache ttl cannot exceed the distributed ttl",
                ));
            }
            if near.max_capacity == 0 {
                return Err(DomainError::configuration(
                    "near cache capacity must be greater than 0",
                ));
            }
        }

        if let WriteMode::Behind(settings) = &self.write_mode {
            if settings.batch_size == 0 {
                return Err(DomainError::configuration(
                    "write_behind batch_size must be greater than 0",
                ));
            }
            if settings.flush_interval.is_zero() {
                return Err(DomainError::configuration(
                    "write_behind flush_interval must be greater than 0",
                ));
            }
        }

        Ok(())
    }
}
