//! # index-cache
//!
//! Read-through count caching and request coalescing for the campus index directory.
//!
//! Every page of the directory, the admin dashboard, and the health probe want to know how many index items there are:
//! in total, per campus, and created recently. Counting rows on each request is what this crate exists to avoid.
//!
//! # The Basics
//!
//! The cache operates on the following principles:
//!
//! - A shared key-value store (Redis in production, [`store::MemoryStore`] in-process) holds JSON-encoded values
//!   under fixed `cache:<domain>:<qualifier>` keys, each family with its own TTL.
//! - Reads never fail because of the cache. A broken or unreachable key-value store degrades to a miss, and the
//!   relational store is asked directly.
//! - Identical concurrent reads within one process share a single execution through the [`RequestCoalescer`].
//! - Any write that may change a count evicts every count-derived family. There is no refresh-on-write; the next
//!   reader repopulates.
//! - Production instances warm the hottest families shortly after start.
//!
//! # Layers
//!
//! From the bottom up:
//!
//! - [`TtlCache`](ttl_cache::TtlCache): get / populate / read-through over a [`KeyValueStore`].
//! - [`RequestCoalescer`]: in-flight deduplication keyed by a canonical request key.
//! - [`InvalidationPolicy`](invalidation::InvalidationPolicy): which writes evict which families.
//! - [`DashboardAggregator`](dashboard::DashboardAggregator): the count queries and the dashboard snapshot.
//! - [`IndexCache`]: owns all of the above plus background tasks.
//!
//! Relational access goes through the [`RelationalStore`] trait; with the `sea-orm` feature (or `sqlite`/`pg`) the
//! [`db::SeaOrmStore`] implements it over the `index_items` table.

pub mod cache;
pub mod coalescer;
pub mod config;
pub mod dashboard;
#[cfg(feature = "sea-orm")]
pub mod db;
pub mod error;
pub mod invalidation;
pub mod key;
pub mod store;
pub mod traits;
pub mod ttl_cache;
pub mod types;
pub mod warmup;

#[doc(inline)]
pub use cache::IndexCache;
#[doc(inline)]
pub use coalescer::RequestCoalescer;
#[doc(inline)]
pub use config::CacheConfig;
#[doc(inline)]
pub use error::CacheError;
#[doc(inline)]
pub use key::request_key;
#[doc(inline)]
pub use key::KeyFamily;
#[doc(inline)]
pub use traits::KeyValueStore;
#[doc(inline)]
pub use traits::RelationalStore;

pub mod prelude {
    pub use crate::cache::IndexCache;
    pub use crate::coalescer::RequestCoalescer;
    pub use crate::config::CacheConfig;
    pub use crate::error::CacheError;
    pub use crate::key::request_key;
    pub use crate::key::KeyFamily;
    pub use crate::store::MemoryStore;
    pub use crate::traits::CacheObserver;
    pub use crate::traits::KeyValueStore;
    pub use crate::traits::RelationalStore;
    pub use crate::types::*;
}
