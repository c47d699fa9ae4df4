use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use metrics_util::debugging::DebuggingRecorder;
use tempfile::TempDir;
use tiercache::cache::{
    CacheConfig, CacheManager, ManualClock, Resource, ResourceCacheConfig, ResourceTable,
    TierStrategy,
};

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let dir = TempDir::new().expect("tempdir");
    let clock = Arc::new(ManualClock::starting_now());
    let table = ResourceTable::builtin().with(
        Resource::Kpis,
        ResourceCacheConfig::new(
            Duration::from_secs(300),
            TierStrategy::Hybrid,
            NonZeroUsize::new(1),
        ),
    );
    let cache = CacheManager::with_clock(
        CacheConfig::with_durable_path(dir.path().join("metrics.sqlite3")),
        table,
        clock.clone(),
    );

    // Miss, fast hit, then an eviction from the single-slot partition.
    let _: Option<u32> = cache.get(Resource::Kpis, "a").await.expect("get");
    cache.set(Resource::Kpis, "a", 1_u32).await.expect("set");
    let _: Option<u32> = cache.get(Resource::Kpis, "a").await.expect("get");
    cache.set(Resource::Kpis, "b", 2_u32).await.expect("set");

    // "a" now lives only in the durable tier: durable hit plus promotion.
    let _: Option<u32> = cache.get(Resource::Kpis, "a").await.expect("get");

    // A durable payload that does not decode as the requested type.
    cache
        .set(Resource::CostBreakdown, "q3", "not a number")
        .await
        .expect("set");
    let _: Option<u32> = cache.get(Resource::CostBreakdown, "q3").await.expect("get");

    // Expiry through the fast sweep, a durable read and the durable sweep.
    cache
        .set(Resource::CostBreakdown, "q4", 4_u32)
        .await
        .expect("set");
    clock.advance(Duration::from_secs(3_601));
    let _: Option<u32> = cache.get(Resource::CostBreakdown, "q3").await.expect("get");
    cache.cleanup().await;

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "tiercache_fast_hit_total",
        "tiercache_durable_hit_total",
        "tiercache_miss_total",
        "tiercache_promotion_total",
        "tiercache_fast_evict_total",
        "tiercache_fast_expired_total",
        "tiercache_durable_expired_total",
        "tiercache_durable_error_total",
        "tiercache_cleanup_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
