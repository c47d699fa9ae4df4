//! The cache façade callers talk to.
//!
//! [`CacheManager`] owns both tiers and the resource table. It is a cheap,
//! cloneable handle; construct one per process and pass it around.
//!
//! Only key construction can fail a call. Durable faults are logged, counted
//! and absorbed: a failed read is a miss and a failed write is dropped.

use std::any::type_name;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::config::CacheConfig;
use super::durable::{DurableState, DurableTier};
use super::entry::CacheEntry;
use super::error::{CacheError, DurableError};
use super::fast::{CachedValue, FastTier, FastWrite};
use super::keys::{CacheKey, CacheKeyable};
use super::maintenance::{self, MaintenanceHandle};
use super::resource::{Resource, ResourceCacheConfig, ResourceTable, TierStrategy};

const METRIC_FAST_HIT: &str = "tiercache_fast_hit_total";
const METRIC_DURABLE_HIT: &str = "tiercache_durable_hit_total";
const METRIC_MISS: &str = "tiercache_miss_total";
const METRIC_PROMOTION: &str = "tiercache_promotion_total";
const METRIC_DURABLE_ERROR: &str = "tiercache_durable_error_total";
const METRIC_CLEANUP_MS: &str = "tiercache_cleanup_ms";

#[derive(Default)]
struct Counters {
    fast_hits: AtomicU64,
    durable_hits: AtomicU64,
    misses: AtomicU64,
    promotions: AtomicU64,
    evictions: AtomicU64,
    writes: AtomicU64,
    durable_errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn read(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

struct ManagerInner {
    resources: Arc<ResourceTable>,
    fast: FastTier,
    durable: Option<DurableTier>,
    counters: Counters,
    sweep_interval: Duration,
    cleanup_interval: Duration,
}

/// Two-tier cache handle. Clones share the same tiers.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<ManagerInner>,
}

/// Non-owning handle held by background tasks.
#[derive(Clone)]
pub(crate) struct WeakCacheManager {
    inner: Weak<ManagerInner>,
}

impl WeakCacheManager {
    pub(crate) fn upgrade(&self) -> Option<CacheManager> {
        self.inner.upgrade().map(|inner| CacheManager { inner })
    }
}

/// Rows and entries removed by one [`CacheManager::cleanup`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub fast_purged: usize,
    pub durable_purged: u64,
}

/// Entries removed by an invalidation, per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Invalidated {
    pub fast_removed: usize,
    pub durable_removed: u64,
}

/// What [`CacheManager::prefetch`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefetchOutcome {
    /// The resource has no cache policy; nothing was fetched.
    NotCacheable,
    /// A live entry already exists; nothing was fetched.
    AlreadyCached,
    /// The value was fetched and stored.
    Warmed,
    /// The fetch failed; nothing was stored.
    FetchFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct DurableStats {
    pub enabled: bool,
    pub state: Option<DurableState>,
    /// Physical row count, expired rows included. `None` when unavailable.
    pub rows: Option<u64>,
}

/// Point-in-time diagnostics. Counts are best-effort.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub fast_tier_count: usize,
    pub fast_tier_bytes: u64,
    pub fast_tier_by_resource: BTreeMap<Resource, usize>,
    pub durable: DurableStats,
    pub fast_hits: u64,
    pub durable_hits: u64,
    pub misses: u64,
    pub promotions: u64,
    pub evictions: u64,
    pub writes: u64,
    pub durable_errors: u64,
}

impl CacheStats {
    /// Share of lookups served by either tier, `0.0` before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.fast_hits + self.durable_hits;
        let lookups = hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        }
    }
}

impl CacheManager {
    pub fn new(config: CacheConfig, resources: ResourceTable) -> Self {
        Self::with_clock(config, resources, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: CacheConfig,
        resources: ResourceTable,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let resources = Arc::new(resources);
        let fast = FastTier::new(
            Arc::clone(&resources),
            config.fast_default_max_entries_non_zero(),
            Arc::clone(&clock),
        );
        let durable = config
            .enable_durable_tier
            .then(|| DurableTier::new(&config, Arc::clone(&clock)));

        Self {
            inner: Arc::new(ManagerInner {
                resources,
                fast,
                durable,
                counters: Counters::default(),
                sweep_interval: config.fast_sweep_interval(),
                cleanup_interval: config.durable_cleanup_interval(),
            }),
        }
    }

    /// Open the durable tier ahead of the first request.
    ///
    /// Safe to call repeatedly and concurrently. Returns whether the durable
    /// tier is usable; the cache keeps working on the fast tier either way.
    pub async fn init(&self) -> bool {
        match &self.inner.durable {
            Some(durable) => durable.init().await,
            None => false,
        }
    }

    pub fn resources(&self) -> &ResourceTable {
        &self.inner.resources
    }

    pub(crate) fn downgrade(&self) -> WeakCacheManager {
        WeakCacheManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn policy(&self, resource: Resource) -> Option<ResourceCacheConfig> {
        self.inner.resources.get(resource).copied()
    }

    /// Look up `(resource, params)`, fast tier first.
    ///
    /// A fast-tier value written as another type is decoded from its JSON
    /// encoding. A durable hit for a hybrid resource is copied into the fast
    /// tier with a full TTL measured from now.
    pub async fn get<P, V>(&self, resource: Resource, params: &P) -> Result<Option<V>, CacheError>
    where
        P: CacheKeyable + ?Sized,
        V: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let Some(policy) = self.policy(resource) else {
            return Ok(None);
        };
        let key = CacheKey::new(resource, params)?;

        if policy.tier.uses_fast()
            && let Some(cached) = self.inner.fast.get(&key)
            && let Some(value) = read_fast::<V>(&key, &cached)
        {
            Counters::bump(&self.inner.counters.fast_hits);
            counter!(METRIC_FAST_HIT, "resource" => resource.as_str()).increment(1);
            return Ok(Some(value));
        }

        let epoch = self.inner.fast.epoch(resource);
        if policy.tier.uses_durable()
            && let Some(entry) = self.durable_read(&key).await
        {
            match serde_json::from_slice::<V>(&entry.value) {
                Ok(value) => {
                    Counters::bump(&self.inner.counters.durable_hits);
                    counter!(METRIC_DURABLE_HIT, "resource" => resource.as_str()).increment(1);
                    if policy.tier == TierStrategy::Hybrid {
                        let cached = CachedValue::new(value.clone(), Some(Arc::from(entry.value)));
                        self.promote(key, cached, policy.ttl, entry.estimated_size, epoch);
                    }
                    return Ok(Some(value));
                }
                Err(err) => {
                    self.record_durable_error("decode", &DurableError::codec(err.to_string()));
                }
            }
        }

        Counters::bump(&self.inner.counters.misses);
        counter!(METRIC_MISS, "resource" => resource.as_str()).increment(1);
        Ok(None)
    }

    fn promote(
        &self,
        key: CacheKey,
        value: CachedValue,
        ttl: Duration,
        estimated_size: usize,
        epoch: u64,
    ) {
        let resource = key.resource();
        match self
            .inner
            .fast
            .insert_if_absent(key, value, ttl, estimated_size, epoch)
        {
            Some(write) => {
                self.record_fast_write(&write);
                Counters::bump(&self.inner.counters.promotions);
                counter!(METRIC_PROMOTION, "resource" => resource.as_str()).increment(1);
            }
            None => debug!(
                resource = %resource,
                "Skipped promotion; fast tier holds a newer entry or the resource was invalidated"
            ),
        }
    }

    /// Store `value` under `(resource, params)` in every tier the resource uses.
    ///
    /// Uncacheable resources are a no-op. A value that cannot be encoded as
    /// JSON is kept in the fast tier only.
    pub async fn set<P, V>(
        &self,
        resource: Resource,
        params: &P,
        value: V,
    ) -> Result<(), CacheError>
    where
        P: CacheKeyable + ?Sized,
        V: Serialize + Send + Sync + 'static,
    {
        let Some(policy) = self.policy(resource) else {
            debug!(resource = %resource, "Resource is not cacheable; dropping write");
            return Ok(());
        };
        let key = CacheKey::new(resource, params)?;

        let payload: Option<Arc<[u8]>> = match serde_json::to_vec(&value) {
            Ok(payload) => Some(Arc::from(payload)),
            Err(err) => {
                warn!(
                    key = %key,
                    error = %err,
                    "Failed to encode cache value; durable write skipped"
                );
                None
            }
        };
        let estimated_size = payload.as_deref().map_or(0, <[u8]>::len);

        Counters::bump(&self.inner.counters.writes);

        if policy.tier.uses_fast() {
            let cached = CachedValue::new(value, payload.clone());
            let write = self
                .inner
                .fast
                .set(key.clone(), cached, policy.ttl, estimated_size);
            self.record_fast_write(&write);
        }

        if policy.tier.uses_durable()
            && let (Some(durable), Some(payload)) = (&self.inner.durable, payload)
        {
            let result = durable.set(&key, &payload, policy.ttl).await;
            self.absorb("set", result);
        }

        Ok(())
    }

    /// Remove `(resource, params)` from both tiers. Returns whether anything was removed.
    ///
    /// The durable row goes first, so a concurrent read cannot promote it
    /// back after the fast entry is dropped.
    pub async fn invalidate<P>(&self, resource: Resource, params: &P) -> Result<bool, CacheError>
    where
        P: CacheKeyable + ?Sized,
    {
        let key = CacheKey::new(resource, params)?;
        let durable_removed = match &self.inner.durable {
            Some(durable) => self
                .absorb("delete", durable.delete(&key).await)
                .unwrap_or(false),
            None => false,
        };
        let fast_removed = self.inner.fast.delete(&key);

        debug!(key = %key, fast_removed, durable_removed, "Invalidated cache key");
        Ok(fast_removed || durable_removed)
    }

    /// Remove every entry of one resource from both tiers.
    pub async fn invalidate_resource(&self, resource: Resource) -> Invalidated {
        let durable_removed = match &self.inner.durable {
            Some(durable) => self
                .absorb("delete_resource", durable.delete_resource(resource).await)
                .unwrap_or(0),
            None => 0,
        };
        let fast_removed = self.inner.fast.delete_resource(resource);

        let report = Invalidated {
            fast_removed,
            durable_removed,
        };
        info!(
            resource = %resource,
            fast_removed,
            durable_removed,
            "Invalidated cached resource"
        );
        report
    }

    /// Drop everything from both tiers.
    pub async fn invalidate_all(&self) -> Invalidated {
        let durable_removed = match &self.inner.durable {
            Some(durable) => self.absorb("clear", durable.clear().await).unwrap_or(0),
            None => 0,
        };
        let fast_removed = self.inner.fast.clear();

        info!(fast_removed, durable_removed, "Cleared cache");
        Invalidated {
            fast_removed,
            durable_removed,
        }
    }

    /// Drain due fast-tier deadlines.
    pub fn purge_fast(&self) -> usize {
        let purged = self.inner.fast.purge_expired();
        if purged > 0 {
            debug!(purged, "Purged expired fast tier entries");
        }
        purged
    }

    /// Delete expired durable rows.
    pub async fn cleanup_durable(&self) -> u64 {
        let Some(durable) = &self.inner.durable else {
            return 0;
        };

        let started = Instant::now();
        let purged = self.absorb("cleanup", durable.cleanup().await).unwrap_or(0);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
        histogram!(METRIC_CLEANUP_MS).record(elapsed_ms);

        if purged > 0 {
            info!(purged, elapsed_ms, "Swept expired durable rows");
        } else {
            debug!(elapsed_ms, "Durable sweep found nothing to remove");
        }
        purged
    }

    /// One full maintenance pass over both tiers.
    pub async fn cleanup(&self) -> CleanupReport {
        CleanupReport {
            fast_purged: self.purge_fast(),
            durable_purged: self.cleanup_durable().await,
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        let durable = match &self.inner.durable {
            Some(durable) => DurableStats {
                enabled: true,
                state: Some(durable.state()),
                rows: match durable.state() {
                    DurableState::Ready => self.absorb("count", durable.count().await),
                    DurableState::Unopened | DurableState::Unavailable => None,
                },
            },
            None => DurableStats {
                enabled: false,
                state: None,
                rows: None,
            },
        };

        CacheStats {
            fast_tier_count: self.inner.fast.len(),
            fast_tier_bytes: self.inner.fast.estimated_bytes(),
            fast_tier_by_resource: self.inner.fast.counts(),
            durable,
            fast_hits: Counters::read(&counters.fast_hits),
            durable_hits: Counters::read(&counters.durable_hits),
            misses: Counters::read(&counters.misses),
            promotions: Counters::read(&counters.promotions),
            evictions: Counters::read(&counters.evictions),
            writes: Counters::read(&counters.writes),
            durable_errors: Counters::read(&counters.durable_errors),
        }
    }

    /// Warm `(resource, params)` by awaiting `fetch` when nothing live is cached.
    ///
    /// A durable-only copy counts as cached; the next `get` promotes it.
    pub async fn prefetch<P, V, E, F, Fut>(
        &self,
        resource: Resource,
        params: &P,
        fetch: F,
    ) -> Result<PrefetchOutcome, CacheError>
    where
        P: CacheKeyable + ?Sized,
        V: Serialize + Send + Sync + 'static,
        E: fmt::Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let Some(policy) = self.policy(resource) else {
            return Ok(PrefetchOutcome::NotCacheable);
        };
        let key = CacheKey::new(resource, params)?;

        if self.is_cached(&key, policy.tier).await {
            return Ok(PrefetchOutcome::AlreadyCached);
        }

        match fetch().await {
            Ok(value) => {
                self.set(resource, params, value).await?;
                debug!(key = %key, "Prefetched cache entry");
                Ok(PrefetchOutcome::Warmed)
            }
            Err(err) => {
                warn!(key = %key, error = %err, "Prefetch fetch failed");
                Ok(PrefetchOutcome::FetchFailed)
            }
        }
    }

    async fn is_cached(&self, key: &CacheKey, tier: TierStrategy) -> bool {
        if tier.uses_fast() && self.inner.fast.contains(key) {
            return true;
        }
        tier.uses_durable() && self.durable_read(key).await.is_some()
    }

    /// Start the background sweeper. It stops when the handle is shut down
    /// or dropped, or once every manager clone is gone.
    pub fn spawn_maintenance(&self) -> MaintenanceHandle {
        maintenance::spawn(
            self.downgrade(),
            self.inner.sweep_interval,
            self.inner.durable.is_some().then_some(self.inner.cleanup_interval),
        )
    }

    /// Close the durable pool. Later calls reopen nothing and miss.
    pub async fn close(&self) {
        if let Some(durable) = &self.inner.durable {
            durable.close().await;
        }
    }

    async fn durable_read(&self, key: &CacheKey) -> Option<CacheEntry<Vec<u8>>> {
        let durable = self.inner.durable.as_ref()?;
        self.absorb("get", durable.get(key).await).flatten()
    }

    fn record_fast_write(&self, write: &FastWrite) {
        if let FastWrite::Evicted(_) = write {
            Counters::bump(&self.inner.counters.evictions);
        }
    }

    fn absorb<T>(&self, op: &'static str, result: Result<T, DurableError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            // Already reported once when the open failed.
            Err(DurableError::Unavailable) => None,
            Err(err) => {
                self.record_durable_error(op, &err);
                None
            }
        }
    }

    fn record_durable_error(&self, op: &'static str, err: &DurableError) {
        Counters::bump(&self.inner.counters.durable_errors);
        counter!(METRIC_DURABLE_ERROR, "op" => op).increment(1);
        warn!(op, error = %err, "Durable tier operation failed; degrading");
    }
}

/// The fast-tier value as a `V`: the stored value itself when it was written
/// as one, otherwise decoded from its JSON encoding.
fn read_fast<V>(key: &CacheKey, cached: &CachedValue) -> Option<V>
where
    V: DeserializeOwned + Clone + 'static,
{
    if let Some(value) = cached.downcast_ref::<V>() {
        return Some(value.clone());
    }

    match cached.encoded().map(serde_json::from_slice::<V>) {
        Some(Ok(value)) => Some(value),
        Some(Err(err)) => {
            warn!(
                key = %key,
                expected = type_name::<V>(),
                error = %err,
                "Fast tier entry does not decode as the requested type; treating as miss"
            );
            None
        }
        None => {
            warn!(
                key = %key,
                expected = type_name::<V>(),
                "Fast tier holds a different type with no encoding; treating as miss"
            );
            None
        }
    }
}
