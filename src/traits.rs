use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheError;
use crate::error::Result;
use crate::key::KeyFamily;
use crate::types::ItemFilter;

/// Remote key-value store shared by all process instances. Latency and availability are untrusted: every call may
/// fail and callers in this crate never let such failures escape a read.
#[async_trait]
pub trait KeyValueStore: Debug + Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    /// Set a value. With `expiry` the store itself drops the key once the duration elapses.
    async fn set(&self, key: &str, value: String, expiry: Option<Duration>) -> Result<()>;
    /// Returns the number of keys removed.
    async fn del(&self, key: &str) -> Result<u64>;
    async fn exists(&self, key: &str) -> Result<bool>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;
    /// Returns the number of newly created fields.
    async fn hset(&self, key: &str, field: &str, value: String) -> Result<u64>;
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Returns the number of members actually added.
    async fn sadd(&self, key: &str, member: &str) -> Result<u64>;
    async fn smembers(&self, key: &str) -> Result<HashSet<String>>;
}

/// Source of truth for index items.
#[async_trait]
pub trait RelationalStore: Debug + Send + Sync + 'static {
    /// Count items matching the filter. Connectivity problems are reported as [`CacheError::Store`].
    async fn count(&self, filter: &ItemFilter) -> Result<u64>;
}

/// Why a cache read turned into a miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    Absent,
    Malformed,
    StoreError,
}

/// Hooks for the events the cache layer otherwise only logs. All methods default to doing nothing.
#[async_trait]
pub trait CacheObserver: Send + Sync + 'static {
    async fn on_hit(&self, _key: &str) {}
    async fn on_miss(&self, _key: &str, _reason: MissReason) {}
    async fn on_populate_error(&self, _key: &str, _error: &CacheError) {}
    async fn on_invalidate_error(&self, _key: &str, _error: &CacheError) {}
    async fn on_warmup_error(&self, _family: KeyFamily, _error: &CacheError) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentObserver;

#[async_trait]
impl CacheObserver for SilentObserver {}
