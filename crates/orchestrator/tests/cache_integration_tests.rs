//! Cache Integration Tests
//!
//! LRU bounds, JPEG-backed image storage and device-driven sizing.

mod support;

use orchestrator::{
    BoundedLru, CacheConfig, CacheStore, DeviceCapabilities, GenerationCache, PerformanceTier,
    TelemetryRecorder,
};
use proptest::prelude::*;
use std::sync::Arc;
use support::solid_image;

fn cache_with(config: CacheConfig) -> (GenerationCache, Arc<TelemetryRecorder>) {
    let telemetry = Arc::new(TelemetryRecorder::new());
    (GenerationCache::new(config, telemetry.clone()), telemetry)
}

proptest! {
    /// Size never exceeds capacity and the last key put is always present.
    #[test]
    fn prop_lru_respects_capacity(
        capacity in 1usize..16,
        keys in proptest::collection::vec(0u8..32, 1..200),
    ) {
        let mut lru = BoundedLru::new(capacity);
        for (i, key) in keys.iter().enumerate() {
            lru.put(*key, i);
            prop_assert!(lru.len() <= capacity);
            prop_assert!(lru.contains(key));
        }
    }

    /// Anything read after the newest insert survives one more insert.
    #[test]
    fn prop_recent_read_survives_eviction(
        capacity in 2usize..10,
        fill in 0usize..40,
    ) {
        let mut lru = BoundedLru::new(capacity);
        for i in 0..(capacity + fill) {
            lru.put(i, i);
        }
        let oldest = lru.keys_by_recency()[0];
        prop_assert!(lru.get(&oldest).is_some());

        lru.put(usize::MAX, 0);
        prop_assert!(lru.contains(&oldest));
    }
}

/// Test that images survive the JPEG round trip with their dimensions
#[test]
fn test_image_round_trip() {
    let (cache, telemetry) = cache_with(CacheConfig::default());
    let image = solid_image(32, 24, [90, 160, 220, 255]);

    assert!(cache.get_image("k").is_none());
    cache.put_image("k", &image);

    let restored = cache.get_image("k").expect("cached image");
    assert_eq!((restored.width(), restored.height()), (32, 24));
    assert!(cache.contains("k"));

    let stats = cache.get_stats();
    assert_eq!(stats.image_count, 1);
    assert!(stats.image_bytes > 0);
    assert!((stats.image_hit_rate - 0.5).abs() < f64::EPSILON);

    let report = telemetry.get_telemetry_report();
    assert_eq!(report.image_cache.hits, 1);
    assert_eq!(report.image_cache.misses, 1);
    assert_eq!(report.image_cache.puts, 1);
}

/// Test least-recently-used eviction in the text store
#[test]
fn test_text_eviction_order() {
    let (cache, telemetry) = cache_with(CacheConfig {
        image_capacity: 2,
        text_capacity: 2,
        image_quality: 80,
    });

    cache.put_text("a", "alpha");
    cache.put_text("b", "beta");
    // Touch "a" so "b" becomes the eviction candidate
    assert_eq!(cache.get_text("a").as_deref(), Some("alpha"));
    cache.put_text("c", "gamma");

    assert!(cache.get_text("b").is_none());
    assert_eq!(cache.get_text("a").as_deref(), Some("alpha"));
    assert_eq!(cache.get_text("c").as_deref(), Some("gamma"));
    assert!(cache.text_inserted_at("c").is_some());

    assert_eq!(cache.get_stats().total_evictions, 1);
    assert_eq!(telemetry.get_telemetry_report().text_cache.evictions, 1);
}

/// Test that clearing empties both stores
#[test]
fn test_clear_empties_both_stores() {
    let (cache, _) = cache_with(CacheConfig::default());
    cache.put_text("t", "text");
    cache.put_image("i", &solid_image(4, 4, [0, 0, 0, 255]));

    cache.clear();

    let stats = cache.get_stats();
    assert_eq!(stats.image_count, 0);
    assert_eq!(stats.text_count, 0);
    assert!(!cache.contains("t"));
}

/// Test that device tiers size the cache when adaptation is on
#[test]
fn test_device_tier_sizes_cache() {
    let mut base = common::CacheConfigBase::default();
    let low = DeviceCapabilities::for_tier(PerformanceTier::Low);
    let high = DeviceCapabilities::for_tier(PerformanceTier::High);

    let low_config = CacheConfig::resolve(&base, &low);
    let high_config = CacheConfig::resolve(&base, &high);
    assert!(low_config.image_capacity < high_config.image_capacity);
    assert!(low_config.image_quality < high_config.image_quality);

    base.adapt_to_device = false;
    base.image_capacity = 7;
    assert_eq!(CacheConfig::resolve(&base, &high).image_capacity, 7);

    let telemetry = TelemetryRecorder::new();
    telemetry.record_cache_hit(CacheStore::Text);
    assert_eq!(telemetry.get_telemetry_report().text_cache.hits, 1);
}
