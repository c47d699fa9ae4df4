//! Runtime configuration for the two tiers.
//!
//! Resource policies live in [`super::ResourceTable`]; this struct only
//! covers how the tiers themselves are sized and maintained.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_FAST_MAX_ENTRIES: usize = 100;
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1_000;
const DEFAULT_DURABLE_PATH: &str = "data/tiercache.sqlite3";
const DEFAULT_DURABLE_MAX_CONNECTIONS: u32 = 4;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60 * 60;
const DEFAULT_COMPRESS_THRESHOLD_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Fast-tier capacity for resources that do not set `max_entries`.
    pub fast_default_max_entries: usize,
    /// How often due fast-tier deadlines are drained.
    pub fast_sweep_interval_ms: u64,
    /// Disable to run fast-tier only; durable-only resources then never cache.
    pub enable_durable_tier: bool,
    pub durable_path: PathBuf,
    pub durable_max_connections: u32,
    pub durable_busy_timeout_ms: u64,
    /// How often expired durable rows are swept.
    pub durable_cleanup_interval_secs: u64,
    /// Durable payloads above this size are zstd compressed.
    pub compress_threshold_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fast_default_max_entries: DEFAULT_FAST_MAX_ENTRIES,
            fast_sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            enable_durable_tier: true,
            durable_path: PathBuf::from(DEFAULT_DURABLE_PATH),
            durable_max_connections: DEFAULT_DURABLE_MAX_CONNECTIONS,
            durable_busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            durable_cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
            compress_threshold_bytes: DEFAULT_COMPRESS_THRESHOLD_BYTES,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            fast_default_max_entries: settings.fast_tier.default_max_entries.get(),
            fast_sweep_interval_ms: settings.fast_tier.sweep_interval.as_millis() as u64,
            enable_durable_tier: settings.durable_tier.enabled,
            durable_path: settings.durable_tier.path.clone(),
            durable_max_connections: settings.durable_tier.max_connections.get(),
            durable_busy_timeout_ms: settings.durable_tier.busy_timeout.as_millis() as u64,
            durable_cleanup_interval_secs: settings.durable_tier.cleanup_interval.as_secs(),
            compress_threshold_bytes: settings.durable_tier.compress_threshold_bytes,
        }
    }
}

impl CacheConfig {
    /// Config for a durable tier stored at `path`, everything else default.
    pub fn with_durable_path(path: impl Into<PathBuf>) -> Self {
        Self {
            durable_path: path.into(),
            ..Default::default()
        }
    }

    /// Config with the durable tier switched off.
    pub fn fast_only() -> Self {
        Self {
            enable_durable_tier: false,
            ..Default::default()
        }
    }

    /// Returns the default fast-tier capacity, clamping to 1 if zero.
    pub fn fast_default_max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.fast_default_max_entries).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the sweep interval, clamping to 1ms if zero.
    pub fn fast_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.fast_sweep_interval_ms.max(1))
    }

    /// Returns the durable cleanup interval, clamping to 1s if zero.
    pub fn durable_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.durable_cleanup_interval_secs.max(1))
    }

    pub fn durable_busy_timeout(&self) -> Duration {
        Duration::from_millis(self.durable_busy_timeout_ms)
    }

    /// Returns the pool size, clamping to 1 if zero.
    pub fn durable_max_connections_non_zero(&self) -> u32 {
        self.durable_max_connections.max(1)
    }
}
