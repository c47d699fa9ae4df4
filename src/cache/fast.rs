//! Fast tier: bounded in-process LRU with per-entry expiry.
//!
//! Each resource gets its own LRU partition sized by its `max_entries`, so
//! one busy resource cannot push another out. Expiry is tracked in a single
//! min-heap of deadlines stamped with the write generation that created them;
//! [`FastTier::purge_expired`] drains due deadlines and ignores any whose
//! generation no longer matches the live entry (overwritten or deleted keys).
//! Reads also check expiry, so a late sweep never serves stale data.
//!
//! Every delete bumps a per-resource invalidation epoch. Promotion carries the
//! epoch it observed before its durable read and is dropped if it moved.

use std::any::Any;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use metrics::counter;
use time::OffsetDateTime;
use tracing::debug;

use super::clock::Clock;
use super::entry::CacheEntry;
use super::keys::CacheKey;
use super::lock::mutex_lock;
use super::resource::{Resource, ResourceTable};

const SOURCE: &str = "cache::fast";
const METRIC_FAST_EVICT: &str = "tiercache_fast_evict_total";
const METRIC_FAST_EXPIRED: &str = "tiercache_fast_expired_total";

/// Stale deadlines tolerated beyond twice the live entry count.
const DEADLINE_SLACK: usize = 64;

/// Value held by the fast tier: the caller's typed value plus its JSON
/// encoding, when it had one.
#[derive(Clone)]
pub struct CachedValue {
    typed: Arc<dyn Any + Send + Sync>,
    encoded: Option<Arc<[u8]>>,
}

impl CachedValue {
    pub fn new<V>(value: V, encoded: Option<Arc<[u8]>>) -> Self
    where
        V: Any + Send + Sync,
    {
        Self {
            typed: Arc::new(value),
            encoded,
        }
    }

    /// The stored value, if it was written as a `V`.
    pub fn downcast_ref<V: Any>(&self) -> Option<&V> {
        (*self.typed).downcast_ref::<V>()
    }

    pub fn encoded(&self) -> Option<&[u8]> {
        self.encoded.as_deref()
    }
}

/// Result of a fast-tier write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FastWrite {
    Inserted,
    Replaced,
    /// The write pushed out the least-recently-used key of the partition.
    Evicted(CacheKey),
}

struct FastSlot {
    entry: CacheEntry<CachedValue>,
    generation: u64,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Deadline {
    expires_at: OffsetDateTime,
    generation: u64,
    key: CacheKey,
}

#[derive(Default)]
struct FastState {
    partitions: HashMap<Resource, LruCache<CacheKey, FastSlot>>,
    deadlines: BinaryHeap<Reverse<Deadline>>,
    next_generation: u64,
    epochs: HashMap<Resource, u64>,
}

impl FastState {
    fn epoch(&self, resource: Resource) -> u64 {
        self.epochs.get(&resource).copied().unwrap_or_default()
    }

    fn bump_epoch(&mut self, resource: Resource) {
        *self.epochs.entry(resource).or_default() += 1;
    }

    fn live_len(&self) -> usize {
        self.partitions.values().map(LruCache::len).sum()
    }

    fn compact_deadlines(&mut self) {
        let live = self.live_len();
        if self.deadlines.len() <= live.saturating_mul(2) + DEADLINE_SLACK {
            return;
        }

        let before = self.deadlines.len();
        self.deadlines = self
            .partitions
            .values()
            .flat_map(|partition| partition.iter())
            .map(|(key, slot)| {
                Reverse(Deadline {
                    expires_at: slot.entry.expires_at,
                    generation: slot.generation,
                    key: key.clone(),
                })
            })
            .collect();

        debug!(
            before,
            after = self.deadlines.len(),
            "Compacted fast tier deadline queue"
        );
    }
}

pub struct FastTier {
    resources: Arc<ResourceTable>,
    default_capacity: NonZeroUsize,
    clock: Arc<dyn Clock>,
    state: Mutex<FastState>,
}

impl FastTier {
    pub fn new(
        resources: Arc<ResourceTable>,
        default_capacity: NonZeroUsize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resources,
            default_capacity,
            clock,
            state: Mutex::new(FastState::default()),
        }
    }

    fn capacity_for(&self, resource: Resource) -> NonZeroUsize {
        self.resources
            .get(resource)
            .and_then(|config| config.max_entries)
            .unwrap_or(self.default_capacity)
    }

    /// Insert or overwrite `key`, making it the most recently used entry.
    pub fn set(
        &self,
        key: CacheKey,
        value: CachedValue,
        ttl: Duration,
        estimated_size: usize,
    ) -> FastWrite {
        let entry = CacheEntry::new(value, self.clock.now(), ttl, estimated_size);
        let mut state = mutex_lock(&self.state, SOURCE, "set");
        self.write_locked(&mut state, key, entry)
    }

    /// Current invalidation epoch of `resource`.
    pub fn epoch(&self, resource: Resource) -> u64 {
        mutex_lock(&self.state, SOURCE, "epoch").epoch(resource)
    }

    /// Insert only when no live entry exists for `key` and nothing of its
    /// resource was invalidated since `epoch` was read. Returns `None` when
    /// the write was skipped.
    ///
    /// Used for promotion so a write that landed while the durable read was
    /// in flight is never replaced by the older durable copy, and an
    /// invalidated value is never put back.
    pub fn insert_if_absent(
        &self,
        key: CacheKey,
        value: CachedValue,
        ttl: Duration,
        estimated_size: usize,
        epoch: u64,
    ) -> Option<FastWrite> {
        let now = self.clock.now();
        let mut state = mutex_lock(&self.state, SOURCE, "insert_if_absent");

        if state.epoch(key.resource()) != epoch {
            return None;
        }
        let occupied = state
            .partitions
            .get(&key.resource())
            .and_then(|partition| partition.peek(&key))
            .is_some_and(|slot| !slot.entry.is_expired_at(now));
        if occupied {
            return None;
        }

        let entry = CacheEntry::new(value, now, ttl, estimated_size);
        Some(self.write_locked(&mut state, key, entry))
    }

    fn write_locked(
        &self,
        state: &mut FastState,
        key: CacheKey,
        entry: CacheEntry<CachedValue>,
    ) -> FastWrite {
        let generation = state.next_generation;
        state.next_generation += 1;

        let resource = key.resource();
        let capacity = self.capacity_for(resource);
        let partition = state
            .partitions
            .entry(resource)
            .or_insert_with(|| LruCache::new(capacity));

        let expires_at = entry.expires_at;
        let outcome = match partition.push(key.clone(), FastSlot { entry, generation }) {
            None => FastWrite::Inserted,
            Some((previous, _)) if previous == key => FastWrite::Replaced,
            Some((evicted, _)) => {
                counter!(METRIC_FAST_EVICT, "resource" => resource.as_str()).increment(1);
                debug!(resource = %resource, evicted = %evicted, "Fast tier evicted LRU entry");
                FastWrite::Evicted(evicted)
            }
        };

        state.deadlines.push(Reverse(Deadline {
            expires_at,
            generation,
            key,
        }));
        state.compact_deadlines();

        outcome
    }

    /// Look up `key`, refreshing its LRU position on a hit.
    pub fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        let now = self.clock.now();
        let mut state = mutex_lock(&self.state, SOURCE, "get");
        let partition = state.partitions.get_mut(&key.resource())?;

        match partition.get(key) {
            None => return None,
            Some(slot) if !slot.entry.is_expired_at(now) => return Some(slot.entry.value.clone()),
            Some(_) => {}
        }

        partition.pop(key);
        counter!(METRIC_FAST_EXPIRED, "resource" => key.resource().as_str()).increment(1);
        None
    }

    /// Whether a live entry exists, without touching LRU order.
    pub fn contains(&self, key: &CacheKey) -> bool {
        let now = self.clock.now();
        let state = mutex_lock(&self.state, SOURCE, "contains");
        state
            .partitions
            .get(&key.resource())
            .and_then(|partition| partition.peek(key))
            .is_some_and(|slot| !slot.entry.is_expired_at(now))
    }

    /// Remove `key`. Returns whether an entry was present.
    pub fn delete(&self, key: &CacheKey) -> bool {
        let mut state = mutex_lock(&self.state, SOURCE, "delete");
        state.bump_epoch(key.resource());
        state
            .partitions
            .get_mut(&key.resource())
            .and_then(|partition| partition.pop(key))
            .is_some()
    }

    /// Drop every entry of one resource.
    pub fn delete_resource(&self, resource: Resource) -> usize {
        let mut state = mutex_lock(&self.state, SOURCE, "delete_resource");
        state.bump_epoch(resource);
        let removed = state
            .partitions
            .remove(&resource)
            .map_or(0, |partition| partition.len());
        state.compact_deadlines();
        removed
    }

    /// Drop all entries and all pending deadlines.
    pub fn clear(&self) -> usize {
        let mut state = mutex_lock(&self.state, SOURCE, "clear");
        let removed = state.live_len();
        for resource in Resource::ALL {
            state.bump_epoch(resource);
        }
        state.partitions.clear();
        state.deadlines.clear();
        removed
    }

    /// Remove every entry whose deadline has passed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = mutex_lock(&self.state, SOURCE, "purge_expired");
        let FastState {
            partitions,
            deadlines,
            ..
        } = &mut *state;

        let mut purged = 0;
        while let Some(Reverse(next)) = deadlines.peek() {
            if next.expires_at > now {
                break;
            }
            let Some(Reverse(deadline)) = deadlines.pop() else {
                break;
            };
            let resource = deadline.key.resource();
            let Some(partition) = partitions.get_mut(&resource) else {
                continue;
            };
            let current = partition
                .peek(&deadline.key)
                .is_some_and(|slot| slot.generation == deadline.generation);
            if current {
                partition.pop(&deadline.key);
                counter!(METRIC_FAST_EXPIRED, "resource" => resource.as_str()).increment(1);
                purged += 1;
            }
        }

        purged
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "len").live_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len_for(&self, resource: Resource) -> usize {
        mutex_lock(&self.state, SOURCE, "len_for")
            .partitions
            .get(&resource)
            .map_or(0, LruCache::len)
    }

    /// Entry count per resource, omitting empty partitions.
    pub fn counts(&self) -> BTreeMap<Resource, usize> {
        mutex_lock(&self.state, SOURCE, "counts")
            .partitions
            .iter()
            .filter(|(_, partition)| !partition.is_empty())
            .map(|(resource, partition)| (*resource, partition.len()))
            .collect()
    }

    pub fn estimated_bytes(&self) -> u64 {
        mutex_lock(&self.state, SOURCE, "estimated_bytes")
            .partitions
            .values()
            .flat_map(|partition| partition.iter())
            .map(|(_, slot)| slot.entry.estimated_size as u64)
            .sum()
    }

    /// Deadlines still queued, including stale ones not yet drained.
    pub fn pending_deadlines(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "pending_deadlines")
            .deadlines
            .len()
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::resource::{ResourceCacheConfig, TierStrategy};

    const TTL: Duration = Duration::from_secs(60);

    fn tier_with(max_entries: usize) -> (FastTier, Arc<ManualClock>) {
        let table = ResourceTable::empty()
            .with(
                Resource::Kpis,
                ResourceCacheConfig::new(
                    TTL,
                    TierStrategy::FastOnly,
                    NonZeroUsize::new(max_entries),
                ),
            )
            .with(
                Resource::SystemHealth,
                ResourceCacheConfig::new(TTL, TierStrategy::FastOnly, None),
            );
        let clock = Arc::new(ManualClock::new(datetime!(2026-10-16 09:00 UTC)));
        let tier = FastTier::new(
            Arc::new(table),
            NonZeroUsize::new(10).expect("non-zero"),
            clock.clone(),
        );
        (tier, clock)
    }

    fn key(resource: Resource, name: &str) -> CacheKey {
        CacheKey::new(resource, name).expect("key")
    }

    fn value(n: u32) -> CachedValue {
        CachedValue::new(n, None)
    }

    fn read(tier: &FastTier, key: &CacheKey) -> Option<u32> {
        tier.get(key).and_then(|v| v.downcast_ref::<u32>().copied())
    }

    #[test]
    fn set_then_get_roundtrip() {
        let (tier, _) = tier_with(2);
        let a = key(Resource::Kpis, "a");

        assert_eq!(tier.set(a.clone(), value(1), TTL, 1), FastWrite::Inserted);
        assert_eq!(read(&tier, &a), Some(1));
        assert_eq!(tier.set(a.clone(), value(2), TTL, 1), FastWrite::Replaced);
        assert_eq!(read(&tier, &a), Some(2));
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn third_key_evicts_least_recently_used() {
        let (tier, _) = tier_with(2);
        let (a, b, c) = (
            key(Resource::Kpis, "A"),
            key(Resource::Kpis, "B"),
            key(Resource::Kpis, "C"),
        );

        tier.set(a.clone(), value(1), TTL, 1);
        tier.set(b.clone(), value(2), TTL, 1);
        assert_eq!(
            tier.set(c.clone(), value(3), TTL, 1),
            FastWrite::Evicted(a.clone())
        );

        assert_eq!(read(&tier, &a), None);
        assert_eq!(read(&tier, &b), Some(2));
        assert_eq!(read(&tier, &c), Some(3));
        assert_eq!(tier.len_for(Resource::Kpis), 2);
    }

    #[test]
    fn get_refreshes_lru_position() {
        let (tier, _) = tier_with(2);
        let (a, b, c) = (
            key(Resource::Kpis, "A"),
            key(Resource::Kpis, "B"),
            key(Resource::Kpis, "C"),
        );

        tier.set(a.clone(), value(1), TTL, 1);
        tier.set(b.clone(), value(2), TTL, 1);
        assert_eq!(read(&tier, &a), Some(1));

        assert_eq!(
            tier.set(c.clone(), value(3), TTL, 1),
            FastWrite::Evicted(b.clone())
        );
        assert_eq!(read(&tier, &a), Some(1));
    }

    #[test]
    fn partitions_are_bounded_independently() {
        let (tier, _) = tier_with(1);

        tier.set(key(Resource::SystemHealth, "db"), value(1), TTL, 1);
        tier.set(key(Resource::Kpis, "a"), value(2), TTL, 1);
        tier.set(key(Resource::Kpis, "b"), value(3), TTL, 1);

        assert_eq!(tier.len_for(Resource::Kpis), 1);
        assert_eq!(tier.len_for(Resource::SystemHealth), 1);
        assert_eq!(read(&tier, &key(Resource::SystemHealth, "db")), Some(1));
    }

    #[test]
    fn reads_miss_once_ttl_elapsed_without_sweep() {
        let (tier, clock) = tier_with(2);
        let a = key(Resource::Kpis, "a");
        tier.set(a.clone(), value(1), TTL, 1);

        clock.advance(TTL - Duration::from_secs(1));
        assert_eq!(read(&tier, &a), Some(1));

        clock.advance(Duration::from_secs(1));
        assert_eq!(read(&tier, &a), None);
        assert!(tier.is_empty());
    }

    #[test]
    fn purge_removes_due_entries_only() {
        let (tier, clock) = tier_with(5);
        let short = key(Resource::Kpis, "short");
        let long = key(Resource::Kpis, "long");
        tier.set(short.clone(), value(1), Duration::from_secs(10), 1);
        tier.set(long.clone(), value(2), Duration::from_secs(100), 1);

        clock.advance(Duration::from_secs(10));
        assert_eq!(tier.purge_expired(), 1);
        assert!(!tier.contains(&short));
        assert!(tier.contains(&long));
        assert_eq!(tier.pending_deadlines(), 1);
    }

    #[test]
    fn stale_deadline_does_not_remove_newer_write() {
        let (tier, clock) = tier_with(5);
        let a = key(Resource::Kpis, "a");
        tier.set(a.clone(), value(1), Duration::from_secs(10), 1);

        clock.advance(Duration::from_secs(5));
        tier.set(a.clone(), value(2), Duration::from_secs(60), 1);

        clock.advance(Duration::from_secs(6));
        assert_eq!(tier.purge_expired(), 0);
        assert_eq!(read(&tier, &a), Some(2));
    }

    #[test]
    fn deleted_then_reused_key_survives_old_deadline() {
        let (tier, clock) = tier_with(5);
        let a = key(Resource::Kpis, "a");
        tier.set(a.clone(), value(1), Duration::from_secs(10), 1);
        assert!(tier.delete(&a));
        assert!(!tier.delete(&a));

        tier.set(a.clone(), value(2), Duration::from_secs(60), 1);
        clock.advance(Duration::from_secs(10));
        assert_eq!(tier.purge_expired(), 0);
        assert_eq!(read(&tier, &a), Some(2));
    }

    #[test]
    fn insert_if_absent_keeps_live_entry() {
        let (tier, clock) = tier_with(5);
        let a = key(Resource::Kpis, "a");
        tier.set(a.clone(), value(1), TTL, 1);

        let epoch = tier.epoch(Resource::Kpis);

        assert_eq!(tier.insert_if_absent(a.clone(), value(9), TTL, 1, epoch), None);
        assert_eq!(read(&tier, &a), Some(1));

        clock.advance(TTL);
        assert_eq!(
            tier.insert_if_absent(a.clone(), value(9), TTL, 1, epoch),
            Some(FastWrite::Replaced)
        );
        assert_eq!(read(&tier, &a), Some(9));
    }

    #[test]
    fn insert_if_absent_skips_after_invalidation() {
        let (tier, _) = tier_with(5);
        let a = key(Resource::Kpis, "a");
        let other = key(Resource::SystemHealth, "db");

        let kpis_epoch = tier.epoch(Resource::Kpis);
        let health_epoch = tier.epoch(Resource::SystemHealth);
        tier.delete(&key(Resource::Kpis, "unrelated"));

        assert_eq!(tier.insert_if_absent(a.clone(), value(1), TTL, 1, kpis_epoch), None);
        assert_eq!(read(&tier, &a), None);
        assert_eq!(
            tier.insert_if_absent(other.clone(), value(2), TTL, 1, health_epoch),
            Some(FastWrite::Inserted)
        );

        let stale = tier.epoch(Resource::SystemHealth);
        tier.clear();
        assert_eq!(tier.insert_if_absent(other, value(3), TTL, 1, stale), None);
    }

    #[test]
    fn encoded_payload_travels_with_value() {
        let (tier, _) = tier_with(2);
        let a = key(Resource::Kpis, "a");
        let encoded: Arc<[u8]> = Arc::from(b"\"ok\"".as_slice());
        tier.set(a.clone(), CachedValue::new("ok", Some(encoded)), TTL, 4);

        let cached = tier.get(&a).expect("hit");
        assert_eq!(cached.downcast_ref::<&str>(), Some(&"ok"));
        assert!(cached.downcast_ref::<String>().is_none());
        assert_eq!(cached.encoded(), Some(b"\"ok\"".as_slice()));
    }

    #[test]
    fn ttl_beyond_calendar_range_never_expires() {
        let (tier, clock) = tier_with(2);
        let a = key(Resource::Kpis, "a");

        assert_eq!(
            tier.set(a.clone(), value(1), Duration::from_secs(1_000_000_000_000), 1),
            FastWrite::Inserted
        );
        clock.advance(Duration::from_secs(100 * 365 * 24 * 60 * 60));
        assert_eq!(tier.purge_expired(), 0);
        assert_eq!(read(&tier, &a), Some(1));
    }

    #[test]
    fn clear_and_delete_resource() {
        let (tier, _) = tier_with(5);
        tier.set(key(Resource::Kpis, "a"), value(1), TTL, 10);
        tier.set(key(Resource::Kpis, "b"), value(2), TTL, 20);
        tier.set(key(Resource::SystemHealth, "db"), value(3), TTL, 30);
        assert_eq!(tier.estimated_bytes(), 60);

        assert_eq!(tier.delete_resource(Resource::Kpis), 2);
        assert_eq!(tier.delete_resource(Resource::Kpis), 0);
        assert_eq!(
            tier.counts(),
            BTreeMap::from([(Resource::SystemHealth, 1)])
        );

        assert_eq!(tier.clear(), 1);
        assert!(tier.is_empty());
        assert_eq!(tier.pending_deadlines(), 0);
    }

    #[test]
    fn overwrites_do_not_grow_deadline_queue_unbounded() {
        let (tier, _) = tier_with(5);
        let a = key(Resource::Kpis, "a");
        for n in 0..500 {
            tier.set(a.clone(), value(n), TTL, 1);
        }
        assert!(tier.pending_deadlines() <= 2 + DEADLINE_SLACK + 1);
        assert_eq!(read(&tier, &a), Some(499));
    }

    #[test]
    fn uncapped_resource_uses_default_capacity() {
        let (tier, _) = tier_with(5);
        for n in 0..15 {
            tier.set(key(Resource::SystemHealth, &n.to_string()), value(n), TTL, 1);
        }
        assert_eq!(tier.len_for(Resource::SystemHealth), 10);
    }
}
