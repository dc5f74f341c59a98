use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "events")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub title: String,

    /// YYYY-MM-DD
    pub event_date: String,

    /// Optional HH:MM
    pub event_time: Option<String>,

    pub description: Option<String>,

    pub location: Option<String>,

    /// "community" or "personal"
    pub visibility: String,

    pub created_by: String,

    pub created_at: String,

    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
