use std::time::Duration;

use time::{OffsetDateTime, PrimitiveDateTime};

/// A stored value together with its bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<V> {
    pub value: V,
    pub written_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    /// Serialized size in bytes. Reporting only, never used for eviction.
    pub estimated_size: usize,
    /// Whether the durable payload is zstd compressed.
    pub compressed: bool,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, written_at: OffsetDateTime, ttl: Duration, estimated_size: usize) -> Self {
        Self {
            value,
            written_at,
            expires_at: expiry_after(written_at, ttl),
            estimated_size,
            compressed: false,
        }
    }

    /// An entry is dead from its expiry instant onwards.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }
}

/// `written_at + ttl`, saturating at the latest representable instant.
pub(crate) fn expiry_after(written_at: OffsetDateTime, ttl: Duration) -> OffsetDateTime {
    time::Duration::try_from(ttl)
        .ok()
        .and_then(|ttl| written_at.checked_add(ttl))
        .unwrap_or_else(|| PrimitiveDateTime::MAX.assume_utc())
}
