#![cfg(feature = "test")]

use std::sync::Arc;
use std::time::Duration;

use index_cache::error::CacheError;
use index_cache::invalidation::InvalidationPolicy;
use index_cache::test::CountingStore;
use index_cache::test::FlakyKv;
use index_cache::test::ObservedEvent;
use index_cache::test::RecordingObserver;
use index_cache::traits::KeyValueStore;
use index_cache::ttl_cache::TtlCache;
use index_cache::types::ItemField;
use index_cache::types::ItemMutation;
use index_cache::CacheConfig;
use index_cache::IndexCache;
use index_cache::KeyFamily;
use strum::IntoEnumIterator;

async fn fill(kv: &FlakyKv) {
    for family in KeyFamily::iter() {
        kv.inner().set(family.key(), "1".to_string(), None).await.unwrap();
    }
}

async fn cached_families(kv: &FlakyKv) -> Vec<KeyFamily> {
    let mut present = Vec::new();
    for family in KeyFamily::iter() {
        if kv.inner().get(family.key()).await.unwrap().is_some() {
            present.push(family);
        }
    }
    present
}

fn index_cache(kv: &Arc<FlakyKv>, store: &Arc<CountingStore>) -> IndexCache {
    IndexCache::new(CacheConfig::for_campuses(["North", "South"]).unwrap(), kv.clone(), store.clone())
}

#[tokio::test]
async fn every_count_derived_family_is_evicted() {
    let kv = Arc::new(FlakyKv::new());
    let policy = InvalidationPolicy::new(TtlCache::new(kv.clone()));
    assert_eq!(policy.families().len(), KeyFamily::iter().count());

    fill(&kv).await;
    let report = policy.invalidate_item_caches().await;

    assert!(report.is_complete());
    assert_eq!(report.evicted, KeyFamily::iter().collect::<Vec<_>>());
    assert!(cached_families(&kv).await.is_empty());
}

#[tokio::test]
async fn failed_delete_does_not_stop_the_others() {
    let kv = Arc::new(FlakyKv::new());
    let observer = Arc::new(RecordingObserver::new());
    let policy = InvalidationPolicy::new(TtlCache::new(kv.clone()).with_observer(observer.clone()));

    fill(&kv).await;
    kv.fail_del(KeyFamily::CampusCounts.key());
    let report = policy.on_write(&ItemMutation::Deleted).await;

    assert!(!report.is_complete());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, KeyFamily::CampusCounts);
    assert_eq!(report.evicted.len(), KeyFamily::iter().count() - 1);
    assert_eq!(cached_families(&kv).await, vec![KeyFamily::CampusCounts]);
    assert_eq!(
        observer.events(),
        vec![ObservedEvent::InvalidateError(KeyFamily::CampusCounts.key().to_string())]
    );
}

#[tokio::test]
async fn cosmetic_updates_keep_counts() {
    let kv = Arc::new(FlakyKv::new());
    let policy = InvalidationPolicy::new(TtlCache::new(kv.clone()));
    fill(&kv).await;

    let report = policy
        .on_write(&ItemMutation::updated([ItemField::Title, ItemField::Url]))
        .await;
    assert_eq!(report.evicted, Vec::new());
    assert!(kv.deleted_keys().is_empty());
    assert_eq!(cached_families(&kv).await.len(), KeyFamily::iter().count());

    let report = policy.on_write(&ItemMutation::updated([ItemField::Title, ItemField::Campus])).await;
    assert_eq!(report.evicted.len(), KeyFamily::iter().count());
    assert!(cached_families(&kv).await.is_empty());
}

#[tokio::test]
async fn mutation_classification() {
    let policy = InvalidationPolicy::new(TtlCache::new(Arc::new(FlakyKv::new())));
    let all = KeyFamily::iter().collect::<Vec<_>>();

    assert_eq!(policy.families_for(&ItemMutation::Created), all);
    assert_eq!(policy.families_for(&ItemMutation::Deleted), all);
    assert_eq!(policy.families_for(&ItemMutation::updated([ItemField::Letter])), all);
    assert!(policy.families_for(&ItemMutation::updated([ItemField::Url])).is_empty());
    assert!(policy.families_for(&ItemMutation::updated([])).is_empty());
}

#[tokio::test(start_paused = true)]
async fn write_forces_next_read_back_to_the_store() {
    let kv = Arc::new(FlakyKv::new());
    let store = Arc::new(CountingStore::new(10));
    let cache = index_cache(&kv, &store);

    assert_eq!(cache.total_items_count().await.unwrap(), 10);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(cache.total_items_count().await.unwrap(), 10);
    assert_eq!(store.calls(), 1);

    store.set_total(11);
    let report = cache.on_item_write(&ItemMutation::Created).await;
    assert!(report.is_complete());

    assert_eq!(cache.total_items_count().await.unwrap(), 11);
    assert_eq!(store.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn read_right_after_write_skips_settled_query() {
    let kv = Arc::new(FlakyKv::new());
    let store = Arc::new(CountingStore::new(10));
    let cache = index_cache(&kv, &store);

    assert_eq!(cache.total_items_count().await.unwrap(), 10);
    assert_eq!(cache.dashboard_stats().await.unwrap().total_items, 10);

    store.set_total(11);
    cache.on_item_write(&ItemMutation::Deleted).await;

    // No time passes: the earlier queries are still within their grace window.
    assert_eq!(cache.total_items_count().await.unwrap(), 11);
    assert_eq!(cache.dashboard_stats().await.unwrap().total_items, 11);

    store.set_total(12);
    cache.invalidate_item_caches().await;
    assert_eq!(cache.total_items_count().await.unwrap(), 12);
}

#[tokio::test(start_paused = true)]
async fn query_in_flight_during_write_does_not_cache_its_value() {
    let kv = Arc::new(FlakyKv::new());
    let store = Arc::new(CountingStore::new(10).with_latency(Duration::from_millis(300)));
    let cache = Arc::new(index_cache(&kv, &store));

    let reader = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.total_items_count().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    store.set_total(11);
    assert!(cache.on_item_write(&ItemMutation::Created).await.is_complete());

    // The reader began before the write and may well see the old count.
    assert_eq!(reader.await.unwrap().unwrap(), 10);
    assert_eq!(kv.inner().get(KeyFamily::TotalCount.key()).await.unwrap(), None);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(cache.total_items_count().await.unwrap(), 11);
    assert_eq!(store.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn apply_write_invalidates_only_after_success() {
    let kv = Arc::new(FlakyKv::new());
    let store = Arc::new(CountingStore::new(10));
    let cache = index_cache(&kv, &store);

    fill(&kv).await;
    let failed = cache
        .apply_write(ItemMutation::Created, async { Err::<u32, _>(CacheError::store("unique violation")) })
        .await;
    assert!(matches!(failed, Err(CacheError::Store(_))));
    assert!(kv.deleted_keys().is_empty(), "failed write evicts nothing");

    let id = cache
        .apply_write(ItemMutation::Created, async { Ok::<_, CacheError>(42u32) })
        .await
        .unwrap();
    assert_eq!(id, 42);
    assert!(cached_families(&kv).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn incomplete_invalidation_is_not_an_error_for_the_writer() {
    let kv = Arc::new(FlakyKv::new());
    let store = Arc::new(CountingStore::new(10));
    let cache = index_cache(&kv, &store);

    fill(&kv).await;
    kv.fail_del(KeyFamily::TotalCount.key());
    let outcome = cache
        .apply_write(ItemMutation::Deleted, async { Ok::<_, CacheError>(true) })
        .await;

    assert!(outcome.unwrap());
    assert_eq!(cached_families(&kv).await, vec![KeyFamily::TotalCount]);
}
