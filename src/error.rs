//! Error types of the cache core.
use std::sync::Arc;

use thiserror::Error;

pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The result type used across the crate.
pub type Result<T, E = CacheError> = std::result::Result<T, E>;

/// Outcome of a coalesced read. Every waiter of the same in-flight query gets a clone of the same error.
pub type SharedResult<T> = std::result::Result<T, Arc<CacheError>>;

#[derive(Debug, Error)]
pub enum CacheError {
    /// The key-value store failed. Never surfaces from cache reads, populates, or invalidation.
    #[error("key-value store error: {0}")]
    KeyValue(#[source] BoxedError),

    /// The relational store failed. This one is fatal to the read that triggered it.
    #[error("relational store error: {0}")]
    Store(#[source] BoxedError),

    #[error("value under '{key}' has unexpected shape: {reason}")]
    Shape { key: String, reason: String },

    #[error("sub-query task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("coalesced query for '{0}' finished without a result")]
    Abandoned(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CacheError {
    pub fn key_value<E: Into<BoxedError>>(err: E) -> Self {
        Self::KeyValue(err.into())
    }

    pub fn store<E: Into<BoxedError>>(err: E) -> Self {
        Self::Store(err.into())
    }

    pub fn shape<K: ToString, R: ToString>(key: K, reason: R) -> Self {
        Self::Shape {
            key:    key.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for errors coming from the source of truth; these are never swallowed.
    pub fn is_store_error(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Task(_))
    }
}

#[cfg(feature = "sea-orm")]
impl From<sea_orm::DbErr> for CacheError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Store(Box::new(err))
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::KeyValue(Box::new(err))
    }
}
