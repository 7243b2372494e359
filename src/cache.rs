use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::info;
use tracing::warn;

use crate::config::CacheConfig;
use crate::dashboard::DashboardAggregator;
use crate::error::SharedResult;
use crate::invalidation::InvalidationPolicy;
use crate::traits::CacheObserver;
use crate::traits::KeyValueStore;
use crate::traits::RelationalStore;
use crate::ttl_cache::TtlCache;
use crate::types::CacheStats;
use crate::types::CampusCount;
use crate::types::DashboardStats;
use crate::types::InvalidationReport;
use crate::types::ItemMutation;
use crate::warmup::CacheWarmer;
use crate::warmup::WarmupReport;

/// This is where everything comes together.
///
/// ```ignore
/// let cache = IndexCache::new(
///     CacheConfig::for_campuses(["North", "South"])?,
///     Arc::new(RedisStore::connect("redis://127.0.0.1/").await?),
///     Arc::new(SeaOrmStore::connect("sqlite://index.db").await?),
/// );
/// cache.start();
///
/// let stats = cache.dashboard_stats().await?;
///
/// // Writers report their mutations so stale counts get evicted.
/// let item = cache
///     .apply_write(ItemMutation::Created, store.insert_item(title, url, 'A', "North", Utc::now()))
///     .await?;
/// ```
///
/// Background work (the coalescer sweep and, in production, the delayed warm-up) is owned by the instance: it begins
/// with [`start()`](Self::start) and ends with [`stop()`](Self::stop) or when the instance is dropped.
pub struct IndexCache {
    aggregator:   DashboardAggregator,
    invalidation: InvalidationPolicy,
    config:       Arc<CacheConfig>,
    warmup_task:  Mutex<Option<JoinHandle<()>>>,
}

impl IndexCache {
    pub fn new(config: CacheConfig, kv: Arc<dyn KeyValueStore>, store: Arc<dyn RelationalStore>) -> Self {
        Self::build(config, TtlCache::new(kv), store)
    }

    pub fn with_observer(
        config: CacheConfig,
        kv: Arc<dyn KeyValueStore>,
        store: Arc<dyn RelationalStore>,
        observer: Arc<dyn CacheObserver>,
    ) -> Self {
        Self::build(config, TtlCache::new(kv).with_observer(observer), store)
    }

    fn build(config: CacheConfig, cache: TtlCache, store: Arc<dyn RelationalStore>) -> Self {
        let config = Arc::new(config);
        Self {
            aggregator: DashboardAggregator::new(cache.clone(), store, Arc::clone(&config)),
            invalidation: InvalidationPolicy::new(cache),
            config,
            warmup_task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn aggregator(&self) -> &DashboardAggregator {
        &self.aggregator
    }

    pub fn invalidation(&self) -> &InvalidationPolicy {
        &self.invalidation
    }

    /// Start the coalescer sweep; production instances also schedule the warm-up after the configured delay.
    pub fn start(&self) {
        self.aggregator.coalescer().start();

        if self.config.production() {
            let mut warmup = self.warmup_task.lock();
            if warmup.is_none() {
                info!("scheduling cache warm-up in {:?}", self.config.warmup_delay());
                *warmup = Some(CacheWarmer::new(self.aggregator.clone()).spawn(self.config.warmup_delay()));
            }
        }
    }

    pub fn stop(&self) {
        self.aggregator.coalescer().stop();
        if let Some(task) = self.warmup_task.lock().take() {
            task.abort();
        }
    }

    /// Warm the cache right now, regardless of the production flag.
    pub async fn warm(&self) -> WarmupReport {
        CacheWarmer::new(self.aggregator.clone()).warm().await
    }

    pub async fn total_items_count(&self) -> SharedResult<u64> {
        self.aggregator.total_items_count().await
    }

    pub async fn campus_items_counts(&self) -> SharedResult<Vec<CampusCount>> {
        self.aggregator.campus_items_counts().await
    }

    pub async fn recent_items_count(&self) -> SharedResult<u64> {
        self.aggregator.recent_items_count().await
    }

    pub async fn health_items_count(&self) -> SharedResult<u64> {
        self.aggregator.health_items_count().await
    }

    pub async fn dashboard_stats(&self) -> SharedResult<DashboardStats> {
        self.aggregator.dashboard_stats().await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.aggregator.cache_stats().await
    }

    /// Evict every count-derived family.
    pub async fn invalidate_item_caches(&self) -> InvalidationReport {
        let report = self.invalidation.invalidate_item_caches().await;
        self.aggregator.forget(self.invalidation.families());
        report
    }

    /// Entry point for writers: call after the mutation commits and before reporting success.
    pub async fn on_item_write(&self, mutation: &ItemMutation) -> InvalidationReport {
        let report = self.invalidation.on_write(mutation).await;
        // Queries started before the write must not be joined by reads after it.
        self.aggregator.forget(&self.invalidation.families_for(mutation));
        if !report.is_complete() {
            warn!(
                "invalidation after {mutation:?} incomplete; stale values remain for {:?}",
                report.failed.iter().map(|(f, _)| f).collect::<Vec<_>>()
            );
        }
        report
    }

    /// Run a write and, once it succeeded, invalidate what it made stale. A failed write invalidates nothing and its
    /// error is returned as is.
    pub async fn apply_write<T, E, Fut>(&self, mutation: ItemMutation, write: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let value = write.await?;
        self.on_item_write(&mutation).await;
        Ok(value)
    }
}

impl Drop for IndexCache {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for IndexCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexCache")
            .field("aggregator", &self.aggregator)
            .field("config", &self.config)
            .finish()
    }
}
