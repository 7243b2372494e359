//! Which writes evict which key families.
//!
//! Eviction only deletes keys; the next reader repopulates them through the read-through path. Failures to delete a
//! key are logged and reported but never fail the write: the stale value lives at most until its TTL runs out.
use strum::IntoEnumIterator;
use tracing::debug;
use tracing::instrument;

use crate::key::KeyFamily;
use crate::ttl_cache::TtlCache;
use crate::types::InvalidationReport;
use crate::types::ItemMutation;

#[derive(Debug, Clone)]
pub struct InvalidationPolicy {
    cache:    TtlCache,
    families: Vec<KeyFamily>,
}

impl InvalidationPolicy {
    /// Policy evicting every count-derived family.
    pub fn new(cache: TtlCache) -> Self {
        Self {
            cache,
            families: KeyFamily::iter().filter(KeyFamily::is_count_derived).collect(),
        }
    }

    pub fn families(&self) -> &[KeyFamily] {
        &self.families
    }

    /// Families a mutation makes stale.
    pub fn families_for(&self, mutation: &ItemMutation) -> Vec<KeyFamily> {
        if mutation.affects_counts() {
            self.families.clone()
        }
        else {
            Vec::new()
        }
    }

    pub async fn on_write(&self, mutation: &ItemMutation) -> InvalidationReport {
        let families = self.families_for(mutation);
        if families.is_empty() {
            debug!("{mutation:?} leaves cached counts intact");
            return InvalidationReport::default();
        }
        self.evict(&families).await
    }

    /// Unconditionally evict every count-derived family.
    pub async fn invalidate_item_caches(&self) -> InvalidationReport {
        self.evict(&self.families).await
    }

    #[instrument(level = "debug", skip(self))]
    async fn evict(&self, families: &[KeyFamily]) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        // Keep going after a failure: every other key still has to go.
        for family in families {
            match self.cache.evict(family.key()).await {
                Ok(_) => report.evicted.push(*family),
                Err(err) => report.failed.push((*family, err.to_string())),
            }
        }
        report
    }
}
