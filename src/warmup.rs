//! Proactive population of the hottest families so the first real request after start is a hit.
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;
use tracing::warn;

use crate::dashboard::DashboardAggregator;
use crate::error::CacheError;
use crate::key::KeyFamily;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmupReport {
    pub warmed: Vec<KeyFamily>,
    pub failed: Vec<(KeyFamily, String)>,
}

#[derive(Debug, Clone)]
pub struct CacheWarmer {
    aggregator: DashboardAggregator,
}

impl CacheWarmer {
    pub fn new(aggregator: DashboardAggregator) -> Self {
        Self { aggregator }
    }

    /// Populate total, per-campus and recent counts concurrently. Failures are logged and reported, never raised.
    pub async fn warm(&self) -> WarmupReport {
        let (total, campuses, recent) = tokio::join!(
            self.aggregator.total_items_count(),
            self.aggregator.campus_items_counts(),
            self.aggregator.recent_items_count()
        );

        let mut report = WarmupReport::default();
        let outcomes = [
            (KeyFamily::TotalCount, total.err()),
            (KeyFamily::CampusCounts, campuses.err()),
            (KeyFamily::RecentCount, recent.err()),
        ];
        for (family, error) in outcomes {
            match error {
                None => report.warmed.push(family),
                Some(err) => {
                    self.report_failure(family, &err).await;
                    report.failed.push((family, err.to_string()));
                }
            }
        }

        info!(
            "cache warm-up done: {} warmed, {} failed",
            report.warmed.len(),
            report.failed.len()
        );
        report
    }

    /// Warm up after `delay` on a background task.
    pub fn spawn(self, delay: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            self.warm().await;
        })
    }

    async fn report_failure(&self, family: KeyFamily, err: &CacheError) {
        warn!("cache warm-up of {family} failed: {err}");
        self.aggregator.cache().observer().on_warmup_error(family, err).await;
    }
}
