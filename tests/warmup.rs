#![cfg(feature = "test")]

use std::sync::Arc;
use std::time::Duration;

use index_cache::test::CountingStore;
use index_cache::test::FlakyKv;
use index_cache::test::ObservedEvent;
use index_cache::test::RecordingObserver;
use index_cache::CacheConfig;
use index_cache::IndexCache;
use index_cache::KeyFamily;

fn store() -> Arc<CountingStore> {
    Arc::new(
        CountingStore::new(1524)
            .with_campus("North", 1000)
            .with_campus("South", 524)
            .with_recent(12),
    )
}

fn config(production: bool) -> CacheConfig {
    CacheConfig::builder()
        .campuses(vec!["North".to_string(), "South".to_string()])
        .production(production)
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn production_instance_warms_after_delay() {
    let kv = Arc::new(FlakyKv::new());
    let store = store();
    let cache = IndexCache::new(config(true), kv.clone(), store.clone());

    cache.start();
    assert!(cache.aggregator().coalescer().is_running());

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(store.calls(), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(store.calls(), 4, "total, recent and one per campus");

    let stats = cache.cache_stats().await;
    assert!(stats.is_cached(KeyFamily::TotalCount));
    assert!(stats.is_cached(KeyFamily::CampusCounts));
    assert!(stats.is_cached(KeyFamily::RecentCount));
    assert!(!stats.is_cached(KeyFamily::HealthCount));
    assert!(!stats.is_cached(KeyFamily::DashboardStats));

    // The dashboard is assembled from warm values.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let dashboard = cache.dashboard_stats().await.unwrap();
    assert_eq!(dashboard.total_items, 1524);
    assert_eq!(store.calls(), 4);

    cache.stop();
    assert!(!cache.aggregator().coalescer().is_running());
}

#[tokio::test(start_paused = true)]
async fn non_production_instance_stays_cold() {
    let kv = Arc::new(FlakyKv::new());
    let store = store();
    let cache = IndexCache::new(config(false), kv, store.clone());

    cache.start();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(store.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_pending_warmup() {
    let kv = Arc::new(FlakyKv::new());
    let store = store();
    let cache = IndexCache::new(config(true), kv, store.clone());

    cache.start();
    tokio::time::sleep(Duration::from_secs(1)).await;
    cache.stop();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(store.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn warmup_failures_are_reported_not_raised() {
    let kv = Arc::new(FlakyKv::new());
    let store = store();
    store.fail_campus("South");
    let observer = Arc::new(RecordingObserver::new());
    let cache = IndexCache::with_observer(config(false), kv, store.clone(), observer.clone());

    let report = cache.warm().await;

    assert_eq!(report.warmed, vec![KeyFamily::TotalCount, KeyFamily::RecentCount]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, KeyFamily::CampusCounts);
    assert_eq!(
        observer.count(|e| *e == ObservedEvent::WarmupError(KeyFamily::CampusCounts)),
        1
    );

    let stats = cache.cache_stats().await;
    assert!(stats.is_cached(KeyFamily::TotalCount));
    assert!(!stats.is_cached(KeyFamily::CampusCounts));
}
