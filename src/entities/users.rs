use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique)]
    pub username: String,

    /// Argon2id password hash
    pub password_hash: String,

    pub full_name: String,

    /// Free-text home location as the member typed it
    pub location: Option<String>,

    pub latitude: Option<f64>,

    pub longitude: Option<f64>,

    /// Map marker color, one of the fixed palette
    pub marker_color: String,

    /// Relative path of the uploaded profile photo, if any
    pub photo: Option<String>,

    pub is_admin: bool,

    pub created_at: String,

    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
