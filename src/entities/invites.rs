use sea_orm::entity::prelude::*;
use serde::Serialize;

/// One row per issued invite token.
///
/// `used_by` is a plain back-reference to the username that redeemed the
/// token, not a foreign key: deleting the user must never block on or
/// cascade into the ledger.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "invites")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// 64-char hex bearer token, unguessable
    #[sea_orm(unique)]
    pub token: String,

    pub created_by: String,

    pub created_at: String,

    /// Set exactly once, atomically with the credential insert
    pub used_by: Option<String>,

    pub used_at: Option<String>,

    /// Settable only while `used_by` is unset
    pub revoked: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
