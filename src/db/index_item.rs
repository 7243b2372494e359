//! The `index_items` table: one row per directory entry.
use sea_orm::entity::prelude::*;
use serde::Deserialize;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "index_items")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id:         i32,
    pub title:      String,
    pub url:        String,
    /// Category letter the entry is listed under.
    pub letter:     String,
    pub campus:     String,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
