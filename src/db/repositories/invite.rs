use anyhow::{Context, Result};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};

use crate::entities::{invites, prelude::*};

/// Outcome of an atomic revocation attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked,
    AlreadyUsed,
    NotFound,
}

pub struct InviteRepository {
    conn: DatabaseConnection,
}

impl InviteRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Mint a new token bound to the issuer. Starts unused and unrevoked.
    pub async fn create(&self, created_by: &str) -> Result<invites::Model> {
        let token = generate_token();
        let now = chrono::Utc::now().to_rfc3339();

        let invite = invites::ActiveModel {
            token: Set(token),
            created_by: Set(created_by.to_string()),
            created_at: Set(now),
            used_by: Set(None),
            used_at: Set(None),
            revoked: Set(false),
            ..Default::default()
        }
        .insert(&self.conn)
        .await
        .context("Failed to insert invite")?;

        Ok(invite)
    }

    /// Get an invite by its token
    pub async fn get_by_token(&self, token: &str) -> Result<Option<invites::Model>> {
        Invites::find()
            .filter(invites::Column::Token.eq(token))
            .one(&self.conn)
            .await
            .context("Failed to query invite by token")
    }

    /// List all invites, newest first
    pub async fn list(&self) -> Result<Vec<invites::Model>> {
        Invites::find()
            .order_by_desc(invites::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to list invites")
    }

    /// Revoke a token. The state check and the write happen inside one
    /// transaction: revocation races redemption, so a read-then-write pair
    /// is not enough. A used token can never be revoked.
    ///
    /// Callers must hold the store's redemption lock.
    pub async fn revoke(&self, token: &str) -> Result<RevokeOutcome> {
        let txn = self.conn.begin().await?;

        let invite = Invites::find()
            .filter(invites::Column::Token.eq(token))
            .one(&txn)
            .await
            .context("Failed to query invite for revocation")?;

        let Some(invite) = invite else {
            txn.rollback().await?;
            return Ok(RevokeOutcome::NotFound);
        };

        if invite.used_by.is_some() {
            txn.rollback().await?;
            return Ok(RevokeOutcome::AlreadyUsed);
        }

        let mut active: invites::ActiveModel = invite.into();
        active.revoked = Set(true);
        active
            .update(&txn)
            .await
            .context("Failed to revoke invite")?;

        txn.commit().await?;
        Ok(RevokeOutcome::Revoked)
    }
}

/// Generate a random invite token (64 character hex string)
#[must_use]
pub fn generate_token() -> String {
    use rand::Rng;

    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();

    bytes.iter().fold(String::with_capacity(64), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}
