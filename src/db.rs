//! SeaORM-backed [`RelationalStore`].
pub mod index_item;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use sea_orm::ActiveModelTrait;
use sea_orm::ColumnTrait;
use sea_orm::Condition;
use sea_orm::ConnectionTrait;
use sea_orm::Database;
use sea_orm::DatabaseConnection;
use sea_orm::EntityTrait;
use sea_orm::PaginatorTrait;
use sea_orm::QueryFilter;
use sea_orm::Schema;
use sea_orm::Set;
use tracing::debug;
use tracing::instrument;

use crate::error::Result;
use crate::traits::RelationalStore;
use crate::types::ItemFilter;

pub use index_item::Entity as IndexItems;
pub use index_item::Model as IndexItem;

#[derive(Debug, Clone)]
pub struct SeaOrmStore {
    connection: DatabaseConnection,
}

impl SeaOrmStore {
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let connection = Database::connect(url)
            .await
            .inspect_err(|e| tracing::error!("Error connecting to database {url}: {e}"))?;
        Ok(Self { connection })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    /// Create the `index_items` table unless it already exists.
    pub async fn create_schema(&self) -> Result<()> {
        let backend = self.connection.get_database_backend();
        let schema = Schema::new(backend);
        let mut table = schema.create_table_from_entity(IndexItems);
        table.if_not_exists();
        self.connection.execute(backend.build(&table)).await?;
        Ok(())
    }

    /// Insert a row. Callers are responsible for invalidating count caches afterwards.
    pub async fn insert_item(
        &self,
        title: &str,
        url: &str,
        letter: char,
        campus: &str,
        created_at: DateTime<Utc>,
    ) -> Result<IndexItem> {
        let item = index_item::ActiveModel {
            title: Set(title.to_string()),
            url: Set(url.to_string()),
            letter: Set(letter.to_string()),
            campus: Set(campus.to_string()),
            created_at: Set(created_at),
            ..Default::default()
        };
        Ok(item.insert(&self.connection).await?)
    }

    /// Returns true when a row was actually removed.
    pub async fn delete_item(&self, id: i32) -> Result<bool> {
        let outcome = IndexItems::delete_by_id(id).exec(&self.connection).await?;
        Ok(outcome.rows_affected > 0)
    }

    fn condition(filter: &ItemFilter) -> Condition {
        Condition::all()
            .add_option(
                filter
                    .campus
                    .as_ref()
                    .map(|campus| index_item::Column::Campus.eq(campus.as_str())),
            )
            .add_option(filter.letter.map(|letter| index_item::Column::Letter.eq(letter.to_string())))
            .add_option(filter.created_since.map(|since| index_item::Column::CreatedAt.gte(since)))
    }
}

#[async_trait]
impl RelationalStore for SeaOrmStore {
    #[instrument(level = "trace", skip(self))]
    async fn count(&self, filter: &ItemFilter) -> Result<u64> {
        let count = IndexItems::find()
            .filter(Self::condition(filter))
            .count(&self.connection)
            .await?;
        debug!("counted {count} items for {filter:?}");
        Ok(count)
    }
}
