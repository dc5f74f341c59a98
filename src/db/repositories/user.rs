use anyhow::{Context, Result};
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use tokio::task;

use crate::config::SecurityConfig;
use crate::entities::{invites, prelude::*, users};

/// User data returned from the repository (without the password hash)
#[derive(Debug, Clone)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub full_name: String,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub marker_color: String,
    pub photo: Option<String>,
    pub is_admin: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<users::Model> for User {
    fn from(model: users::Model) -> Self {
        Self {
            id: model.id,
            username: model.username,
            full_name: model.full_name,
            location: model.location,
            latitude: model.latitude,
            longitude: model.longitude,
            marker_color: model.marker_color,
            photo: model.photo,
            is_admin: model.is_admin,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Partial profile update; `None` fields are left untouched.
/// The username itself is immutable and not part of this struct.
#[derive(Debug, Default, Clone)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub location: Option<Option<String>>,
    pub latitude: Option<Option<f64>>,
    pub longitude: Option<Option<f64>>,
    pub marker_color: Option<String>,
}

/// Outcome of the atomic credential-insert + token-redemption section.
///
/// The caller has already pre-validated the token and hashed the password;
/// this only reports what the re-validation inside the transaction saw.
#[derive(Debug)]
pub enum RedeemOutcome {
    Created(User),
    TokenNoLongerAvailable,
    UsernameTaken,
}

pub struct UserRepository {
    conn: DatabaseConnection,
}

impl UserRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Get user by username
    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = Users::find()
            .filter(users::Column::Username.eq(username))
            .one(&self.conn)
            .await
            .context("Failed to query user by username")?;

        Ok(user.map(User::from))
    }

    /// List all users, oldest first
    pub async fn list(&self) -> Result<Vec<User>> {
        let users = Users::find()
            .order_by_asc(users::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to list users")?;

        Ok(users.into_iter().map(User::from).collect())
    }

    /// List all users including password hashes, for admin export
    pub async fn list_models(&self) -> Result<Vec<users::Model>> {
        Users::find()
            .order_by_asc(users::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to list users for export")
    }

    /// Create the credential row and mark the invite redeemed, as one
    /// durable unit. The invite is re-read and re-validated here because the
    /// caller suspended on password hashing after its pre-checks; both
    /// mutations commit together or roll back together.
    ///
    /// Callers must hold the store's redemption lock so that at most one
    /// attempt per token observes it as available at commit time.
    pub async fn register_with_invite(
        &self,
        username: &str,
        password_hash: &str,
        token: &str,
    ) -> Result<RedeemOutcome> {
        let txn = self.conn.begin().await?;

        let invite = Invites::find()
            .filter(invites::Column::Token.eq(token))
            .one(&txn)
            .await
            .context("Failed to re-read invite")?;

        let Some(invite) = invite else {
            txn.rollback().await?;
            return Ok(RedeemOutcome::TokenNoLongerAvailable);
        };

        if invite.used_by.is_some() || invite.revoked {
            txn.rollback().await?;
            return Ok(RedeemOutcome::TokenNoLongerAvailable);
        }

        let existing = Users::find()
            .filter(users::Column::Username.eq(username))
            .one(&txn)
            .await
            .context("Failed to re-check username")?;

        if existing.is_some() {
            txn.rollback().await?;
            return Ok(RedeemOutcome::UsernameTaken);
        }

        let now = chrono::Utc::now().to_rfc3339();

        let user = users::ActiveModel {
            username: Set(username.to_string()),
            password_hash: Set(password_hash.to_string()),
            full_name: Set(String::new()),
            marker_color: Set("red".to_string()),
            is_admin: Set(false),
            created_at: Set(now.clone()),
            updated_at: Set(now.clone()),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .context("Failed to insert user")?;

        let mut active: invites::ActiveModel = invite.into();
        active.used_by = Set(Some(username.to_string()));
        active.used_at = Set(Some(now));
        active
            .update(&txn)
            .await
            .context("Failed to mark invite used")?;

        txn.commit().await?;

        Ok(RedeemOutcome::Created(User::from(user)))
    }

    /// Verify password for a user
    /// Note: This uses `spawn_blocking` because Argon2 verification is
    /// CPU-intensive and would block the async runtime if run directly.
    pub async fn verify_password(&self, username: &str, password: &str) -> Result<bool> {
        let user = Users::find()
            .filter(users::Column::Username.eq(username))
            .one(&self.conn)
            .await
            .context("Failed to query user for password verification")?;

        let Some(user) = user else {
            return Ok(false);
        };

        let password_hash = user.password_hash;
        let password = password.to_string();

        let is_valid = task::spawn_blocking(move || {
            let parsed_hash = PasswordHash::new(&password_hash)
                .map_err(|e| anyhow::anyhow!("Invalid password hash format: {e}"))?;

            let argon2 = Argon2::default();
            Ok::<bool, anyhow::Error>(
                argon2
                    .verify_password(password.as_bytes(), &parsed_hash)
                    .is_ok(),
            )
        })
        .await
        .context("Password verification task panicked")??;

        Ok(is_valid)
    }

    /// Update password for a user (hashes the new password)
    pub async fn update_password(
        &self,
        username: &str,
        new_password: &str,
        config: Option<&SecurityConfig>,
    ) -> Result<()> {
        let user = Users::find()
            .filter(users::Column::Username.eq(username))
            .one(&self.conn)
            .await
            .context("Failed to query user for password update")?
            .ok_or_else(|| anyhow::anyhow!("User not found: {username}"))?;

        let password = new_password.to_string();
        let config = config.cloned();
        let new_hash = task::spawn_blocking(move || hash_password(&password, config.as_ref()))
            .await
            .context("Password hashing task panicked")??;

        let now = chrono::Utc::now().to_rfc3339();

        let mut active: users::ActiveModel = user.into();
        active.password_hash = Set(new_hash);
        active.updated_at = Set(now);
        active.update(&self.conn).await?;

        Ok(())
    }

    /// Apply a partial profile update; returns the updated user
    pub async fn update_profile(
        &self,
        username: &str,
        update: ProfileUpdate,
    ) -> Result<Option<User>> {
        let user = Users::find()
            .filter(users::Column::Username.eq(username))
            .one(&self.conn)
            .await
            .context("Failed to query user for profile update")?;

        let Some(user) = user else {
            return Ok(None);
        };

        let mut active: users::ActiveModel = user.into();

        if let Some(full_name) = update.full_name {
            active.full_name = Set(full_name);
        }
        if let Some(location) = update.location {
            active.location = Set(location);
        }
        if let Some(latitude) = update.latitude {
            active.latitude = Set(latitude);
        }
        if let Some(longitude) = update.longitude {
            active.longitude = Set(longitude);
        }
        if let Some(marker_color) = update.marker_color {
            active.marker_color = Set(marker_color);
        }
        active.updated_at = Set(chrono::Utc::now().to_rfc3339());

        let updated = active.update(&self.conn).await?;
        Ok(Some(User::from(updated)))
    }

    /// Set or clear the profile photo path; returns the previous path so the
    /// caller can delete the old file
    pub async fn set_photo(
        &self,
        username: &str,
        photo: Option<String>,
    ) -> Result<Option<Option<String>>> {
        let user = Users::find()
            .filter(users::Column::Username.eq(username))
            .one(&self.conn)
            .await
            .context("Failed to query user for photo update")?;

        let Some(user) = user else {
            return Ok(None);
        };

        let previous = user.photo.clone();

        let mut active: users::ActiveModel = user.into();
        active.photo = Set(photo);
        active.updated_at = Set(chrono::Utc::now().to_rfc3339());
        active.update(&self.conn).await?;

        Ok(Some(previous))
    }

    /// Delete a user; returns the deleted row so the caller can clean up the
    /// photo file. Invite rows referencing the username are left untouched.
    pub async fn delete(&self, username: &str) -> Result<Option<User>> {
        let user = Users::find()
            .filter(users::Column::Username.eq(username))
            .one(&self.conn)
            .await
            .context("Failed to query user for deletion")?;

        let Some(user) = user else {
            return Ok(None);
        };

        let deleted = User::from(user.clone());
        let active: users::ActiveModel = user.into();
        active.delete(&self.conn).await?;

        Ok(Some(deleted))
    }

    /// Insert or overwrite users from an admin import. In replace mode every
    /// existing row is dropped first; in merge mode imported usernames
    /// overwrite, others are kept. Runs in one transaction.
    pub async fn import(&self, imported: Vec<users::Model>, replace: bool) -> Result<u64> {
        let txn = self.conn.begin().await?;

        if replace {
            Users::delete_many().exec(&txn).await?;
        }

        for model in imported {
            let existing = Users::find()
                .filter(users::Column::Username.eq(&model.username))
                .one(&txn)
                .await?;

            let now = chrono::Utc::now().to_rfc3339();

            if let Some(existing) = existing {
                let mut active: users::ActiveModel = existing.into();
                active.password_hash = Set(model.password_hash);
                active.full_name = Set(model.full_name);
                active.location = Set(model.location);
                active.latitude = Set(model.latitude);
                active.longitude = Set(model.longitude);
                active.marker_color = Set(model.marker_color);
                active.photo = Set(model.photo);
                active.is_admin = Set(model.is_admin);
                active.updated_at = Set(now);
                active.update(&txn).await?;
            } else {
                users::ActiveModel {
                    username: Set(model.username),
                    password_hash: Set(model.password_hash),
                    full_name: Set(model.full_name),
                    location: Set(model.location),
                    latitude: Set(model.latitude),
                    longitude: Set(model.longitude),
                    marker_color: Set(model.marker_color),
                    photo: Set(model.photo),
                    is_admin: Set(model.is_admin),
                    created_at: Set(if model.created_at.is_empty() {
                        now.clone()
                    } else {
                        model.created_at
                    }),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;
            }
        }

        let count = Users::find().all(&txn).await?.len() as u64;

        txn.commit().await?;
        Ok(count)
    }
}

/// Hash a password using Argon2id with optional custom params.
/// If config is None, uses default params.
pub fn hash_password(password: &str, config: Option<&SecurityConfig>) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    let argon2 = if let Some(cfg) = config {
        let params = Params::new(
            cfg.argon2_memory_cost_kib,
            cfg.argon2_time_cost,
            cfg.argon2_parallelism,
            None,
        )
        .map_err(|e| anyhow::anyhow!("Invalid Argon2 params: {e}"))?;
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
    } else {
        Argon2::default()
    };

    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))?;

    Ok(hash.to_string())
}
