//! Read-through TTL cache over a [`KeyValueStore`].
//!
//! Values are stored as JSON under the key of their family. The store enforces expiry; this layer only hands it the
//! TTL at write time. Anything that goes wrong on the key-value side is downgraded to a miss (reads) or a logged no-op
//! (writes), so the only errors a caller ever sees come from the computation itself.
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::error::CacheError;
use crate::error::Result;
use crate::traits::CacheObserver;
use crate::traits::KeyValueStore;
use crate::traits::MissReason;
use crate::traits::SilentObserver;

#[derive(Clone)]
pub struct TtlCache {
    store:       Arc<dyn KeyValueStore>,
    observer:    Arc<dyn CacheObserver>,
    // Bumped by every eviction of the key. A computation that started under an older generation must not populate.
    generations: Arc<Mutex<HashMap<String, u64>>>,
}

impl TtlCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            observer: Arc::new(SilentObserver),
            generations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn CacheObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn observer(&self) -> &Arc<dyn CacheObserver> {
        &self.observer
    }

    /// Look the key up. `None` means a miss, whatever the reason.
    #[instrument(level = "trace", skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("cache miss for '{key}'");
                self.observer.on_miss(key, MissReason::Absent).await;
                return None;
            }
            Err(err) => {
                warn!("cache read of '{key}' failed, treating as miss: {err}");
                self.observer.on_miss(key, MissReason::StoreError).await;
                return None;
            }
        };

        match serde_json::from_str::<T>(&raw) {
            Ok(value) => {
                debug!("cache hit for '{key}'");
                self.observer.on_hit(key).await;
                Some(value)
            }
            Err(err) => {
                let err = CacheError::shape(key, err);
                warn!("{err}; treating as miss");
                self.observer.on_miss(key, MissReason::Malformed).await;
                None
            }
        }
    }

    /// Store the value with expiry. Failures are logged and reported to the observer, then returned for the callers
    /// that care; the read path ignores them.
    #[instrument(level = "trace", skip(self, value))]
    pub async fn populate<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let outcome = match serde_json::to_string(value) {
            Ok(raw) => self.store.set(key, raw, Some(ttl)).await,
            Err(err) => Err(CacheError::shape(key, err)),
        };

        match outcome {
            Ok(()) => {
                debug!("cached '{key}' for {}s", ttl.as_secs());
                Ok(())
            }
            Err(err) => {
                warn!("failed to cache '{key}': {err}");
                self.observer.on_populate_error(key, &err).await;
                Err(err)
            }
        }
    }

    /// Serve from cache, or compute, populate and return. Errors of `compute` propagate untouched.
    ///
    /// A value computed while the key was being evicted is returned to the caller but not cached.
    pub async fn read_through<T, E, F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get::<T>(key).await {
            return Ok(value);
        }

        let generation = self.generation(key);
        let value = compute().await?;
        // Failing to cache must never fail the read.
        let _ = self.populate_if_current(key, &value, ttl, generation).await;
        Ok(value)
    }

    /// Current eviction generation of the key.
    pub fn generation(&self, key: &str) -> u64 {
        self.generations.lock().get(key).copied().unwrap_or(0)
    }

    /// Like [`populate`](Self::populate), but only if the key has not been evicted since `generation` was taken.
    /// Returns false when the value was discarded.
    pub async fn populate_if_current<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        generation: u64,
    ) -> Result<bool> {
        if self.generation(key) != generation {
            debug!("'{key}' was evicted while its value was computed; not caching");
            return Ok(false);
        }

        self.populate(key, value, ttl).await?;

        // An eviction may have slipped in between the check and the write.
        if self.generation(key) != generation {
            debug!("'{key}' was evicted while being cached; dropping the value");
            self.store.del(key).await?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Whether a live value sits under the key. The value itself is not fetched.
    pub async fn is_present(&self, key: &str) -> bool {
        match self.store.exists(key).await {
            Ok(present) => present,
            Err(err) => {
                warn!("presence check of '{key}' failed: {err}");
                false
            }
        }
    }

    /// Delete the key. Errors are logged, reported, and returned. Computations already under way for the key will not
    /// cache their result, even when the delete itself fails.
    #[instrument(level = "trace", skip(self))]
    pub async fn evict(&self, key: &str) -> Result<u64> {
        *self.generations.lock().entry(key.to_string()).or_insert(0) += 1;

        match self.store.del(key).await {
            Ok(removed) => {
                debug!("evicted '{key}' ({removed} removed)");
                Ok(removed)
            }
            Err(err) => {
                warn!("failed to evict '{key}': {err}");
                self.observer.on_invalidate_error(key, &err).await;
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for TtlCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache").field("store", &self.store).finish()
    }
}
