use anyhow::Result;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::SecurityConfig;
use crate::entities::{events, invites, users};

pub mod migrator;
pub mod repositories;

pub use repositories::event::EventInput;
pub use repositories::invite::RevokeOutcome;
pub use repositories::user::{ProfileUpdate, RedeemOutcome, User};

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,

    /// Serializes invite redemption and revocation. Redemption attempts on
    /// the same token must be linearizable; volume is low and the critical
    /// section is small, so one global lock is enough.
    redeem_lock: Arc<Mutex<()>>,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        if !db_url.contains(":memory:") {
            let path_str = db_url.trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self {
            conn,
            redeem_lock: Arc::new(Mutex::new(())),
        })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    fn user_repo(&self) -> repositories::user::UserRepository {
        repositories::user::UserRepository::new(self.conn.clone())
    }

    fn invite_repo(&self) -> repositories::invite::InviteRepository {
        repositories::invite::InviteRepository::new(self.conn.clone())
    }

    fn event_repo(&self) -> repositories::event::EventRepository {
        repositories::event::EventRepository::new(self.conn.clone())
    }

    // ========== Users ==========

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.user_repo().get_by_username(username).await
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.user_repo().list().await
    }

    pub async fn list_user_models(&self) -> Result<Vec<users::Model>> {
        self.user_repo().list_models().await
    }

    pub async fn verify_user_password(&self, username: &str, password: &str) -> Result<bool> {
        self.user_repo().verify_password(username, password).await
    }

    pub async fn update_user_password(
        &self,
        username: &str,
        new_password: &str,
        config: Option<&SecurityConfig>,
    ) -> Result<()> {
        self.user_repo()
            .update_password(username, new_password, config)
            .await
    }

    pub async fn update_user_profile(
        &self,
        username: &str,
        update: ProfileUpdate,
    ) -> Result<Option<User>> {
        self.user_repo().update_profile(username, update).await
    }

    pub async fn set_user_photo(
        &self,
        username: &str,
        photo: Option<String>,
    ) -> Result<Option<Option<String>>> {
        self.user_repo().set_photo(username, photo).await
    }

    pub async fn delete_user(&self, username: &str) -> Result<Option<User>> {
        self.user_repo().delete(username).await
    }

    pub async fn import_users(&self, imported: Vec<users::Model>, replace: bool) -> Result<u64> {
        self.user_repo().import(imported, replace).await
    }

    /// Atomic credential-insert + token-redemption section, serialized
    /// against every other redemption and revocation in the process.
    /// The password hash must already be computed; nothing expensive runs
    /// while the lock is held.
    pub async fn register_with_invite(
        &self,
        username: &str,
        password_hash: &str,
        token: &str,
    ) -> Result<RedeemOutcome> {
        let _guard = self.redeem_lock.lock().await;
        self.user_repo()
            .register_with_invite(username, password_hash, token)
            .await
    }

    // ========== Invites ==========

    pub async fn create_invite(&self, created_by: &str) -> Result<invites::Model> {
        self.invite_repo().create(created_by).await
    }

    pub async fn get_invite_by_token(&self, token: &str) -> Result<Option<invites::Model>> {
        self.invite_repo().get_by_token(token).await
    }

    pub async fn list_invites(&self) -> Result<Vec<invites::Model>> {
        self.invite_repo().list().await
    }

    /// Revocation shares the redemption lock: exactly one of {used, revoked}
    /// may ever become true for a token.
    pub async fn revoke_invite(&self, token: &str) -> Result<RevokeOutcome> {
        let _guard = self.redeem_lock.lock().await;
        self.invite_repo().revoke(token).await
    }

    // ========== Events ==========

    pub async fn events_for_month(&self, month: &str, viewer: &str) -> Result<Vec<events::Model>> {
        self.event_repo().for_month(month, viewer).await
    }

    pub async fn get_event(&self, id: i32) -> Result<Option<events::Model>> {
        self.event_repo().get(id).await
    }

    pub async fn create_event(
        &self,
        created_by: &str,
        input: EventInput,
    ) -> Result<events::Model> {
        self.event_repo().create(created_by, input).await
    }

    pub async fn update_event(&self, id: i32, input: EventInput) -> Result<Option<events::Model>> {
        self.event_repo().update(id, input).await
    }

    pub async fn delete_event(&self, id: i32) -> Result<bool> {
        self.event_repo().delete(id).await
    }

    pub async fn list_all_events(&self) -> Result<Vec<events::Model>> {
        self.event_repo().list_all().await
    }

    pub async fn import_events(&self, imported: Vec<events::Model>, replace: bool) -> Result<u64> {
        self.event_repo().import(imported, replace).await
    }
}
