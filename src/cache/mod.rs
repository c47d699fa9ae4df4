//! Tiered cache for dashboard analytics responses.
//!
//! Two tiers sit behind one [`CacheManager`]:
//!
//! - **Fast tier**: in-process LRU partitions per resource, bounded by entry
//!   count, with per-entry expiry.
//! - **Durable tier**: a SQLite table that survives restarts, swept for
//!   expired rows on a long cadence.
//!
//! Each [`Resource`] picks its TTL and tiers through the [`ResourceTable`].
//! Hybrid resources read the fast tier first and promote durable hits.
//!
//! ## Configuration
//!
//! ```toml
//! [fast_tier]
//! default_max_entries = 100
//! sweep_interval_ms = 1000
//!
//! [durable_tier]
//! path = "data/tiercache.sqlite3"
//! cleanup_interval_secs = 3600
//!
//! [resources.kpis]
//! ttl_seconds = 300
//! tier = "hybrid"
//! max_entries = 20
//! ```

mod clock;
mod config;
mod durable;
mod entry;
mod error;
mod fast;
mod keys;
mod lock;
mod maintenance;
mod manager;
mod resource;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use durable::{DurableState, DurableTier};
pub use entry::CacheEntry;
pub use error::{CacheError, DurableError};
pub use fast::{CachedValue, FastTier, FastWrite};
pub use keys::{CacheKey, CacheKeyable, canonical_json};
pub use maintenance::MaintenanceHandle;
pub use manager::{
    CacheManager, CacheStats, CleanupReport, DurableStats, Invalidated, PrefetchOutcome,
};
pub use resource::{
    Resource, ResourceCacheConfig, ResourceTable, TierStrategy, UnknownResource,
};
