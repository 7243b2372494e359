#![cfg(feature = "sqlite")]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use index_cache::db::SeaOrmStore;
use index_cache::store::MemoryStore;
use index_cache::traits::RelationalStore;
use index_cache::types::ItemFilter;
use index_cache::types::ItemMutation;
use index_cache::CacheConfig;
use index_cache::IndexCache;
use sea_orm::ConnectOptions;
use sea_orm::Database;

async fn store() -> Result<SeaOrmStore, Box<dyn std::error::Error>> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    // Every pooled connection would get its own in-memory database otherwise.
    options.max_connections(1).sqlx_logging(false);
    let store = SeaOrmStore::new(Database::connect(options).await?);
    store.create_schema().await?;
    Ok(store)
}

#[tokio::test]
async fn counts_follow_filters() -> Result<(), Box<dyn std::error::Error>> {
    let store = store().await?;
    let now = Utc::now();
    let long_ago = now - chrono::Duration::days(30);

    store
        .insert_item("Admissions", "https://example.edu/admissions", 'A', "North", now)
        .await?;
    store
        .insert_item("Athletics", "https://example.edu/athletics", 'A', "South", long_ago)
        .await?;
    store
        .insert_item("Bookstore", "https://example.edu/bookstore", 'B', "North", long_ago)
        .await?;

    assert_eq!(store.count(&ItemFilter::all()).await?, 3);
    assert_eq!(store.count(&ItemFilter::for_campus("North")).await?, 2);
    assert_eq!(store.count(&ItemFilter::for_campus("Nowhere")).await?, 0);
    assert_eq!(store.count(&ItemFilter::all().with_letter('A')).await?, 2);
    assert_eq!(store.count(&ItemFilter::for_campus("North").with_letter('A')).await?, 1);
    assert_eq!(
        store
            .count(&ItemFilter::created_since(now - chrono::Duration::days(7)))
            .await?,
        1
    );

    Ok(())
}

#[tokio::test]
async fn schema_creation_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
    let store = store().await?;
    store.create_schema().await?;
    assert_eq!(store.count(&ItemFilter::all()).await?, 0);
    Ok(())
}

#[tokio::test]
async fn cached_counts_track_writes() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(store().await?);
    let cache = IndexCache::new(
        CacheConfig::builder()
            .campuses(vec!["North".to_string(), "South".to_string()])
            .coalesce_grace(Duration::ZERO)
            .build()
            .map_err(|e| e.to_string())?,
        Arc::new(MemoryStore::new()),
        store.clone(),
    );

    let item = cache
        .apply_write(
            ItemMutation::Created,
            store.insert_item("Library", "https://example.edu/library", 'L', "South", Utc::now()),
        )
        .await?;
    assert_eq!(cache.total_items_count().await?, 1);

    // Let the settled coalescing entry go away.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let removed = cache
        .apply_write(ItemMutation::Deleted, store.delete_item(item.id))
        .await?;
    assert!(removed);
    assert_eq!(cache.total_items_count().await?, 0);

    let campuses = cache.campus_items_counts().await?;
    assert_eq!(campuses.iter().map(|c| c.count).sum::<u64>(), 0);

    Ok(())
}
