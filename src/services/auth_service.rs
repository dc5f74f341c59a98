//! Domain service for registration and authentication.
//!
//! Registration is invite-gated: a successful call consumes exactly one
//! single-use invite token and creates exactly one credential record, as one
//! atomic unit, or applies no change at all.

use serde::Serialize;
use thiserror::Error;

use crate::db::User;

/// Registration failures, reported to the caller verbatim and never retried
/// internally.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Invite token not found")]
    TokenNotFound,

    #[error("Invite token has already been used")]
    TokenAlreadyUsed,

    #[error("Invite token has been revoked")]
    TokenRevoked,

    /// The token was available at pre-check time but was consumed or revoked
    /// by a concurrent request while this one was hashing its password.
    #[error("Invite token is no longer available")]
    TokenNoLongerAvailable,

    #[error("Username is already taken")]
    UsernameTaken,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for RegisterError {
    fn from(err: anyhow::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Errors specific to login and password changes.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Deliberately undifferentiated: the caller cannot tell an unknown
    /// username from a wrong password.
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("User not found")]
    UserNotFound,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Database(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Session-shaped view of a member, returned from register, login and `me`.
#[derive(Debug, Clone, Serialize)]
pub struct UserSession {
    pub username: String,
    pub full_name: String,
    pub location: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub marker_color: String,
    pub photo: Option<String>,
    pub is_admin: bool,
}

impl From<User> for UserSession {
    fn from(user: User) -> Self {
        let coordinates = match (user.latitude, user.longitude) {
            (Some(lat), Some(lng)) => Some(Coordinates { lat, lng }),
            _ => None,
        };

        Self {
            username: user.username,
            full_name: user.full_name,
            location: user.location,
            coordinates,
            marker_color: user.marker_color,
            photo: user.photo,
            is_admin: user.is_admin,
        }
    }
}

/// Domain service trait for registration and authentication.
#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    /// Redeems an invite token and creates the credential record, or fails
    /// with no partial effect.
    ///
    /// Not idempotent by design: retrying an identical request after success
    /// fails with [`RegisterError::UsernameTaken`] or
    /// [`RegisterError::TokenAlreadyUsed`].
    async fn register(
        &self,
        username: &str,
        password: &str,
        invite_token: &str,
    ) -> Result<UserSession, RegisterError>;

    /// Verifies credentials and returns the session payload.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] for both unknown usernames
    /// and wrong passwords.
    async fn login(&self, username: &str, password: &str) -> Result<UserSession, AuthError>;

    /// Session payload for an existing member.
    async fn session_for(&self, username: &str) -> Result<UserSession, AuthError>;

    /// Changes a member's password after verifying the current one.
    async fn change_password(
        &self,
        username: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError>;
}
