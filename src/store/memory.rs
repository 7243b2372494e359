//! In-process [`KeyValueStore`] on top of a moka cache.
//!
//! Expiry follows the remote store semantics: a key set with an expiry disappears once it elapses. Expiration is
//! checked lazily on access against tokio's clock, which keeps it controllable from tests with a paused runtime.
use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use moka::ops::compute::Op;
use tokio::time::Instant;
use tracing::instrument;

use crate::error::CacheError;
use crate::error::Result;
use crate::traits::KeyValueStore;

const WRONG_TYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug, Clone)]
enum Stored {
    Text(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value:      Stored,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn new(value: Stored) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_live(&self) -> bool {
        self.expires_at.is_none_or(|at| Instant::now() < at)
    }
}

pub struct MemoryStore {
    cache: Cache<String, MemoryEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(max_capacity: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .name("index-cache-memory")
                .build(),
        }
    }

    async fn live(&self, key: &str) -> Option<MemoryEntry> {
        match self.cache.get(key).await {
            Some(entry) if entry.is_live() => Some(entry),
            Some(_) => {
                self.cache.invalidate(key).await;
                None
            }
            None => None,
        }
    }

    // Atomic read-modify-write of a single key. Expired entries are handed to `f` as absent.
    async fn update<R, F>(&self, key: &str, f: F) -> Result<R>
    where
        F: FnOnce(Option<MemoryEntry>) -> Result<(MemoryEntry, R)>,
    {
        let mut outcome = None;
        self.cache
            .entry(key.to_string())
            .and_compute_with(|current| {
                let current = current.map(|e| e.into_value()).filter(MemoryEntry::is_live);
                let op = match f(current) {
                    Ok((entry, r)) => {
                        outcome = Some(Ok(r));
                        Op::Put(entry)
                    }
                    Err(err) => {
                        outcome = Some(Err(err));
                        Op::Nop
                    }
                };
                std::future::ready(op)
            })
            .await;

        outcome.unwrap_or_else(|| Err(CacheError::key_value(format!("update of '{key}' did not run"))))
    }

    fn wrong_type() -> CacheError {
        CacheError::key_value(WRONG_TYPE)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    #[instrument(level = "trace", skip(self))]
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.live(key).await {
            None => Ok(None),
            Some(MemoryEntry {
                value: Stored::Text(text),
                ..
            }) => Ok(Some(text)),
            Some(_) => Err(Self::wrong_type()),
        }
    }

    #[instrument(level = "trace", skip(self, value))]
    async fn set(&self, key: &str, value: String, expiry: Option<Duration>) -> Result<()> {
        let entry = MemoryEntry {
            value:      Stored::Text(value),
            expires_at: expiry.map(|ttl| Instant::now() + ttl),
        };
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    #[instrument(level = "trace", skip(self))]
    async fn del(&self, key: &str) -> Result<u64> {
        Ok(match self.cache.remove(key).await {
            Some(entry) if entry.is_live() => 1,
            _ => 0,
        })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live(key).await.is_some())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        match self.live(key).await {
            None => Ok(None),
            Some(MemoryEntry {
                value: Stored::Hash(hash),
                ..
            }) => Ok(hash.get(field).cloned()),
            Some(_) => Err(Self::wrong_type()),
        }
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> Result<u64> {
        self.update(key, |current| {
            let mut entry = current.unwrap_or_else(|| MemoryEntry::new(Stored::Hash(HashMap::new())));
            let Stored::Hash(ref mut hash) = entry.value
            else {
                return Err(Self::wrong_type());
            };
            let created = hash.insert(field.to_string(), value).is_none();
            Ok((entry, u64::from(created)))
        })
        .await
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.update(key, |current| {
            let mut entry = current.unwrap_or_else(|| MemoryEntry::new(Stored::Hash(HashMap::new())));
            let Stored::Hash(ref mut hash) = entry.value
            else {
                return Err(Self::wrong_type());
            };
            let current = match hash.get(field) {
                Some(raw) => raw
                    .parse::<i64>()
                    .map_err(|_| CacheError::key_value("ERR hash value is not an integer"))?,
                None => 0,
            };
            let next = current
                .checked_add(delta)
                .ok_or_else(|| CacheError::key_value("ERR increment or decrement would overflow"))?;
            hash.insert(field.to_string(), next.to_string());
            Ok((entry, next))
        })
        .await
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        match self.live(key).await {
            None => Ok(HashMap::new()),
            Some(MemoryEntry {
                value: Stored::Hash(hash),
                ..
            }) => Ok(hash),
            Some(_) => Err(Self::wrong_type()),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<u64> {
        self.update(key, |current| {
            let mut entry = current.unwrap_or_else(|| MemoryEntry::new(Stored::Set(HashSet::new())));
            let Stored::Set(ref mut set) = entry.value
            else {
                return Err(Self::wrong_type());
            };
            let added = set.insert(member.to_string());
            Ok((entry, u64::from(added)))
        })
        .await
    }

    async fn smembers(&self, key: &str) -> Result<HashSet<String>> {
        match self.live(key).await {
            None => Ok(HashSet::new()),
            Some(MemoryEntry {
                value: Stored::Set(set),
                ..
            }) => Ok(set),
            Some(_) => Err(Self::wrong_type()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn values_expire() {
        let store = MemoryStore::new();
        store
            .set("cache:count:total_items", "1524".to_string(), Some(Duration::from_secs(1800)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(1799)).await;
        assert_eq!(store.get("cache:count:total_items").await.unwrap(), Some("1524".to_string()));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.get("cache:count:total_items").await.unwrap(), None);
        assert_eq!(store.del("cache:count:total_items").await.unwrap(), 0);
        assert!(!store.exists("cache:count:total_items").await.unwrap());
    }

    #[tokio::test]
    async fn set_without_expiry_persists_and_deletes() {
        let store = MemoryStore::new();
        store.set("k", "v".to_string(), None).await.unwrap();
        assert!(store.exists("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(store.del("k").await.unwrap(), 1);
        assert_eq!(store.del("k").await.unwrap(), 0);
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn hash_operations() {
        let store = MemoryStore::new();
        assert_eq!(store.hincrby("views", "home", 1).await.unwrap(), 1);
        assert_eq!(store.hincrby("views", "home", 2).await.unwrap(), 3);
        assert_eq!(store.hset("views", "about", "7".to_string()).await.unwrap(), 1);
        assert_eq!(store.hset("views", "about", "8".to_string()).await.unwrap(), 0);
        assert_eq!(store.hget("views", "about").await.unwrap(), Some("8".to_string()));

        let all = store.hgetall("views").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["home"], "3");
        assert!(store.hgetall("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_operations() {
        let store = MemoryStore::new();
        assert_eq!(store.sadd("campuses", "North").await.unwrap(), 1);
        assert_eq!(store.sadd("campuses", "North").await.unwrap(), 0);
        assert_eq!(store.sadd("campuses", "South").await.unwrap(), 1);
        let members = store.smembers("campuses").await.unwrap();
        assert!(members.contains("North") && members.contains("South"));
    }

    #[tokio::test]
    async fn wrong_type_is_an_error() {
        let store = MemoryStore::new();
        store.set("plain", "x".to_string(), None).await.unwrap();
        assert!(matches!(store.hincrby("plain", "f", 1).await, Err(CacheError::KeyValue(_))));
        assert!(matches!(store.smembers("plain").await, Err(CacheError::KeyValue(_))));

        store.hset("hash", "f", "not a number".to_string()).await.unwrap();
        assert!(store.hincrby("hash", "f", 1).await.is_err());
        assert!(store.get("hash").await.is_err());
    }
}
