//! Count queries and the dashboard snapshot built from them.
//!
//! Every public read is coalesced first and cached second: concurrent identical reads share one execution, which in
//! turn consults the TTL cache before it touches the relational store.
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use strum::IntoEnumIterator;
use tokio::task::JoinSet;
use tracing::debug;

use crate::coalescer::RequestCoalescer;
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::error::Result;
use crate::error::SharedResult;
use crate::key::request_key;
use crate::key::KeyFamily;
use crate::traits::RelationalStore;
use crate::ttl_cache::TtlCache;
use crate::types::CacheStats;
use crate::types::CampusCount;
use crate::types::DashboardStats;
use crate::types::ItemFilter;

/// Whatever a coalesced read may produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Aggregate {
    Count(u64),
    Campuses(Vec<CampusCount>),
    Dashboard(DashboardStats),
}

impl Aggregate {
    fn into_count(self, family: KeyFamily) -> SharedResult<u64> {
        match self {
            Self::Count(count) => Ok(count),
            other => Err(Arc::new(CacheError::shape(family.key(), format!("expected a count, got {other:?}")))),
        }
    }

    fn into_campuses(self) -> SharedResult<Vec<CampusCount>> {
        match self {
            Self::Campuses(counts) => Ok(counts),
            other => Err(Arc::new(CacheError::shape(
                KeyFamily::CampusCounts.key(),
                format!("expected campus counts, got {other:?}"),
            ))),
        }
    }

    fn into_dashboard(self) -> SharedResult<DashboardStats> {
        match self {
            Self::Dashboard(stats) => Ok(stats),
            other => Err(Arc::new(CacheError::shape(
                KeyFamily::DashboardStats.key(),
                format!("expected dashboard stats, got {other:?}"),
            ))),
        }
    }
}

#[derive(Clone)]
pub struct DashboardAggregator {
    cache:     TtlCache,
    store:     Arc<dyn RelationalStore>,
    coalescer: RequestCoalescer<Aggregate>,
    config:    Arc<CacheConfig>,
}

impl DashboardAggregator {
    pub fn new(cache: TtlCache, store: Arc<dyn RelationalStore>, config: Arc<CacheConfig>) -> Self {
        Self {
            coalescer: RequestCoalescer::from_config(&config),
            cache,
            store,
            config,
        }
    }

    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    pub fn coalescer(&self) -> &RequestCoalescer<Aggregate> {
        &self.coalescer
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn query_key(family: KeyFamily) -> String {
        request_key([("query", family.name())])
    }

    async fn coalesced<F, Fut, E>(&self, family: KeyFamily, load: F) -> SharedResult<Aggregate>
    where
        F: FnOnce(Self) -> Fut,
        Fut: std::future::Future<Output = Result<Aggregate, E>> + Send + 'static,
        E: Into<Arc<CacheError>> + Send + 'static,
    {
        let this = self.clone();
        self.coalescer
            .coalesce(&Self::query_key(family), move || load(this))
            .await
    }

    pub async fn total_items_count(&self) -> SharedResult<u64> {
        self.coalesced(KeyFamily::TotalCount, |this| async move {
            this.cached_count(KeyFamily::TotalCount, ItemFilter::all())
                .await
                .map(Aggregate::Count)
        })
        .await?
        .into_count(KeyFamily::TotalCount)
    }

    /// Items created within the recent window (7 days by default).
    pub async fn recent_items_count(&self) -> SharedResult<u64> {
        self.coalesced(KeyFamily::RecentCount, |this| async move {
            let since = Utc::now() - this.config.recent_window();
            this.cached_count(KeyFamily::RecentCount, ItemFilter::created_since(since))
                .await
                .map(Aggregate::Count)
        })
        .await?
        .into_count(KeyFamily::RecentCount)
    }

    /// Total item count as reported to health checks; cached apart from the dashboard total with a shorter TTL.
    pub async fn health_items_count(&self) -> SharedResult<u64> {
        self.coalesced(KeyFamily::HealthCount, |this| async move {
            this.cached_count(KeyFamily::HealthCount, ItemFilter::all())
                .await
                .map(Aggregate::Count)
        })
        .await?
        .into_count(KeyFamily::HealthCount)
    }

    /// Per-campus counts in configured campus order.
    pub async fn campus_items_counts(&self) -> SharedResult<Vec<CampusCount>> {
        self.coalesced(KeyFamily::CampusCounts, |this| async move {
            let family = KeyFamily::CampusCounts;
            this.cache
                .read_through(family.key(), this.config.ttl_for(family), || this.count_per_campus())
                .await
                .map(Aggregate::Campuses)
        })
        .await?
        .into_campuses()
    }

    pub async fn dashboard_stats(&self) -> SharedResult<DashboardStats> {
        self.coalesced(KeyFamily::DashboardStats, |this| async move {
            let family = KeyFamily::DashboardStats;
            this.cache
                .read_through(family.key(), this.config.ttl_for(family), || this.assemble_dashboard())
                .await
                .map(Aggregate::Dashboard)
        })
        .await?
        .into_dashboard()
    }

    /// Detach in-flight and settled queries of the families so that the next read of each starts over.
    pub fn forget(&self, families: &[KeyFamily]) {
        for family in families {
            self.coalescer.forget(&Self::query_key(*family));
        }
    }

    /// Which families currently hold a value. Values are not revealed.
    pub async fn cache_stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for family in KeyFamily::iter() {
            let present = self.cache.is_present(family.key()).await;
            stats.families.insert(family, present);
        }
        stats
    }

    async fn cached_count(&self, family: KeyFamily, filter: ItemFilter) -> Result<u64> {
        self.cache
            .read_through(family.key(), self.config.ttl_for(family), || self.store.count(&filter))
            .await
    }

    // One count per campus, all at once. A single failure fails the whole set so no partial list gets cached.
    async fn count_per_campus(&self) -> Result<Vec<CampusCount>> {
        let campuses = self.config.campuses();
        let mut tasks = JoinSet::new();

        for (idx, campus) in campuses.iter().cloned().enumerate() {
            let store = Arc::clone(&self.store);
            tasks.spawn(async move {
                let count = store.count(&ItemFilter::for_campus(campus.as_str())).await?;
                Ok::<_, CacheError>((idx, CampusCount { campus, count }))
            });
        }

        let mut counts: Vec<Option<CampusCount>> = vec![None; campuses.len()];
        while let Some(joined) = tasks.join_next().await {
            let (idx, count) = joined??;
            counts[idx] = Some(count);
        }

        debug!("counted items for {} campuses", campuses.len());
        Ok(counts.into_iter().flatten().collect())
    }

    // Sub-queries run concurrently and each goes through its own cache family; values may come from slightly
    // different instants.
    async fn assemble_dashboard(&self) -> Result<DashboardStats, Arc<CacheError>> {
        let (total_items, campus_counts, recent_items) = tokio::try_join!(
            self.total_items_count(),
            self.campus_items_counts(),
            self.recent_items_count()
        )?;

        Ok(DashboardStats {
            total_items,
            campus_counts,
            recent_items,
            last_updated: Utc::now(),
        })
    }
}

impl std::fmt::Debug for DashboardAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardAggregator")
            .field("cache", &self.cache)
            .field("store", &self.store)
            .field("coalescer", &self.coalescer)
            .finish()
    }
}
