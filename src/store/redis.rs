//! Redis-backed [`KeyValueStore`].
use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;
use ::redis::Client;
use tracing::instrument;

use crate::error::Result;
use crate::traits::KeyValueStore;

/// Redis connection shared by clones. The connection manager reconnects on its own after network failures.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    url:  String,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            url: url.to_string(),
        })
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("url", &self.url).finish()
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    #[instrument(level = "trace", skip(self))]
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get::<_, Option<String>>(key).await?)
    }

    #[instrument(level = "trace", skip(self, value))]
    async fn set(&self, key: &str, value: String, expiry: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        match expiry {
            // Redis refuses a zero expiry; one second is the smallest it keeps.
            Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await?,
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    #[instrument(level = "trace", skip(self))]
    async fn del(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.del::<_, u64>(key).await?)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists::<_, bool>(key).await?)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.hget::<_, _, Option<String>>(key, field).await?)
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.hset::<_, _, _, u64>(key, field, value).await?)
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.hincr::<_, _, _, i64>(key, field, delta).await?)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        Ok(conn.hgetall::<_, HashMap<String, String>>(key).await?)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.sadd::<_, _, u64>(key, member).await?)
    }

    async fn smembers(&self, key: &str) -> Result<HashSet<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers::<_, HashSet<String>>(key).await?)
    }
}
