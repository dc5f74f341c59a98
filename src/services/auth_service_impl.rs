//! `SeaORM` implementation of the `AuthService` trait.
//!
//! Registration runs as a two-phase protocol. Phase one, outside any lock:
//! validate input, pre-check token and username state, then hash the
//! password on a blocking thread. Phase two, inside the store's serialized
//! atomic section: re-validate the token, re-check the username, and apply
//! both mutations in one transaction. The pre-checks give precise failure
//! reasons; the re-validation closes the race opened by the hashing
//! suspension, where a concurrent attempt on the same token could also have
//! passed its pre-checks.

use async_trait::async_trait;
use tokio::task;

use crate::config::SecurityConfig;
use crate::db::{RedeemOutcome, Store};
use crate::db::repositories::user::hash_password;
use crate::services::auth_service::{AuthError, AuthService, RegisterError, UserSession};

pub struct SeaOrmAuthService {
    store: Store,
    security: SecurityConfig,
}

impl SeaOrmAuthService {
    #[must_use]
    pub const fn new(store: Store, security: SecurityConfig) -> Self {
        Self { store, security }
    }
}

#[async_trait]
impl AuthService for SeaOrmAuthService {
    async fn register(
        &self,
        username: &str,
        password: &str,
        invite_token: &str,
    ) -> Result<UserSession, RegisterError> {
        let username = username.trim();

        if username.is_empty() || password.is_empty() {
            return Err(RegisterError::InvalidInput(
                "Username and password are required".to_string(),
            ));
        }

        if invite_token.is_empty() {
            return Err(RegisterError::InvalidInput(
                "Invite token is required".to_string(),
            ));
        }

        // Pre-checks, before any expensive work. These give the caller a
        // precise reason; they are re-done inside the atomic section.
        let invite = self
            .store
            .get_invite_by_token(invite_token)
            .await?
            .ok_or(RegisterError::TokenNotFound)?;

        if invite.used_by.is_some() {
            return Err(RegisterError::TokenAlreadyUsed);
        }
        if invite.revoked {
            return Err(RegisterError::TokenRevoked);
        }

        if self.store.get_user_by_username(username).await?.is_some() {
            return Err(RegisterError::UsernameTaken);
        }

        // The expensive part. The request suspends here, so token state may
        // change underneath us before the atomic section re-reads it.
        let password_owned = password.to_string();
        let security = self.security.clone();
        let password_hash =
            task::spawn_blocking(move || hash_password(&password_owned, Some(&security)))
                .await
                .map_err(|e| RegisterError::Internal(format!("Hashing task panicked: {e}")))?
                .map_err(|e| RegisterError::Internal(e.to_string()))?;

        let outcome = self
            .store
            .register_with_invite(username, &password_hash, invite_token)
            .await?;

        match outcome {
            RedeemOutcome::Created(user) => {
                tracing::info!(
                    "Registered user '{}' via invite from '{}'",
                    user.username,
                    invite.created_by
                );
                Ok(UserSession::from(user))
            }
            RedeemOutcome::TokenNoLongerAvailable => Err(RegisterError::TokenNoLongerAvailable),
            RedeemOutcome::UsernameTaken => Err(RegisterError::UsernameTaken),
        }
    }

    async fn login(&self, username: &str, password: &str) -> Result<UserSession, AuthError> {
        // Registration stores the trimmed username, so lookups trim too
        let username = username.trim();

        let is_valid = self.store.verify_user_password(username, password).await?;

        if !is_valid {
            return Err(AuthError::InvalidCredentials);
        }

        let user = self
            .store
            .get_user_by_username(username)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        Ok(UserSession::from(user))
    }

    async fn session_for(&self, username: &str) -> Result<UserSession, AuthError> {
        let user = self
            .store
            .get_user_by_username(username.trim())
            .await?
            .ok_or(AuthError::UserNotFound)?;

        Ok(UserSession::from(user))
    }

    async fn change_password(
        &self,
        username: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        if new_password.len() < 8 {
            return Err(AuthError::Validation(
                "New password must be at least 8 characters".to_string(),
            ));
        }

        if current_password == new_password {
            return Err(AuthError::Validation(
                "New password must be different from current password".to_string(),
            ));
        }

        let is_valid = self
            .store
            .verify_user_password(username, current_password)
            .await?;

        if !is_valid {
            return Err(AuthError::Validation(
                "Current password is incorrect".to_string(),
            ));
        }

        self.store
            .update_user_password(username, new_password, Some(&self.security))
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal Argon2 params so hashing stays fast under test
    fn test_security() -> SecurityConfig {
        SecurityConfig {
            argon2_memory_cost_kib: 64,
            argon2_time_cost: 1,
            argon2_parallelism: 1,
        }
    }

    async fn service() -> (SeaOrmAuthService, Store) {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let svc = SeaOrmAuthService::new(store.clone(), test_security());
        (svc, store)
    }

    #[tokio::test]
    async fn register_consumes_invite_exactly_once() {
        let (svc, store) = service().await;
        let invite = store.create_invite("admin").await.unwrap();

        let session = svc.register("bob", "pw123", &invite.token).await.unwrap();
        assert_eq!(session.username, "bob");
        assert!(!session.is_admin);

        let invite = store
            .get_invite_by_token(&invite.token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(invite.used_by.as_deref(), Some("bob"));
        assert!(invite.used_at.is_some());

        // Same token, different username
        let err = svc.register("carol", "pw456", &invite.token).await;
        assert!(matches!(err, Err(RegisterError::TokenAlreadyUsed)));
        assert!(
            store
                .get_user_by_username("carol")
                .await
                .unwrap()
                .is_none()
        );

        // Identical retry must not silently succeed
        let err = svc.register("bob", "pw123", &invite.token).await;
        assert!(matches!(
            err,
            Err(RegisterError::TokenAlreadyUsed | RegisterError::UsernameTaken)
        ));
    }

    #[tokio::test]
    async fn register_rejects_missing_and_revoked_tokens() {
        let (svc, store) = service().await;

        let err = svc.register("dave", "pw", "").await;
        assert!(matches!(err, Err(RegisterError::InvalidInput(_))));

        let err = svc.register("dave", "pw", "no-such-token").await;
        assert!(matches!(err, Err(RegisterError::TokenNotFound)));

        let invite = store.create_invite("admin").await.unwrap();
        store.revoke_invite(&invite.token).await.unwrap();

        let err = svc.register("dave", "pw", &invite.token).await;
        assert!(matches!(err, Err(RegisterError::TokenRevoked)));
        assert!(store.get_user_by_username("dave").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn register_rejects_taken_username() {
        let (svc, store) = service().await;

        let first = store.create_invite("admin").await.unwrap();
        svc.register("erin", "pw123", &first.token).await.unwrap();

        let second = store.create_invite("admin").await.unwrap();
        let err = svc.register("erin", "other", &second.token).await;
        assert!(matches!(err, Err(RegisterError::UsernameTaken)));

        // The fresh token must remain available
        let second = store
            .get_invite_by_token(&second.token)
            .await
            .unwrap()
            .unwrap();
        assert!(second.used_by.is_none());
        assert!(!second.revoked);
    }

    #[tokio::test]
    async fn concurrent_redemption_of_one_token_admits_exactly_one() {
        let (svc, store) = service().await;
        let svc = std::sync::Arc::new(svc);
        let invite = store.create_invite("admin").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..4 {
            let svc = svc.clone();
            let token = invite.token.clone();
            handles.push(tokio::spawn(async move {
                svc.register(&format!("racer{i}"), "pw", &token).await
            }));
        }

        let mut successes = 0;
        let mut no_longer_available = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(RegisterError::TokenNoLongerAvailable) => no_longer_available += 1,
                Err(other) => panic!("unexpected failure: {other}"),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(no_longer_available, 3);

        let created: Vec<_> = store
            .list_users()
            .await
            .unwrap()
            .into_iter()
            .filter(|u| u.username.starts_with("racer"))
            .collect();
        assert_eq!(created.len(), 1);
    }

    #[tokio::test]
    async fn revoke_and_redeem_race_resolves_to_exactly_one() {
        let (svc, store) = service().await;
        let invite = store.create_invite("admin").await.unwrap();

        let register = svc.register("frank", "pw", &invite.token);
        let revoke = store.revoke_invite(&invite.token);
        let (reg_result, revoke_result) = tokio::join!(register, revoke);

        let invite = store
            .get_invite_by_token(&invite.token)
            .await
            .unwrap()
            .unwrap();

        // Exactly one of {used, revoked} may ever become true
        assert!(invite.used_by.is_some() != invite.revoked);
        if invite.revoked {
            assert!(reg_result.is_err());
        } else {
            assert!(reg_result.is_ok());
            assert_eq!(
                revoke_result.unwrap(),
                crate::db::RevokeOutcome::AlreadyUsed
            );
        }
    }

    #[tokio::test]
    async fn login_trims_username_like_registration() {
        let (svc, store) = service().await;
        let invite = store.create_invite("admin").await.unwrap();

        // Registration trims, so "  heidi " is stored as "heidi"
        let session = svc.register("  heidi ", "pw123", &invite.token).await.unwrap();
        assert_eq!(session.username, "heidi");

        let ok = svc.login("heidi", "pw123").await.unwrap();
        assert_eq!(ok.username, "heidi");

        // Re-submitting the padded form input must still log in
        let ok = svc.login("  heidi ", "pw123").await.unwrap();
        assert_eq!(ok.username, "heidi");

        let padded = svc.session_for(" heidi  ").await.unwrap();
        assert_eq!(padded.username, "heidi");
    }

    #[tokio::test]
    async fn login_does_not_distinguish_unknown_user_from_wrong_password() {
        let (svc, store) = service().await;
        let invite = store.create_invite("admin").await.unwrap();
        svc.register("grace", "correct-pw", &invite.token)
            .await
            .unwrap();

        let ok = svc.login("grace", "correct-pw").await.unwrap();
        assert_eq!(ok.username, "grace");

        let wrong_pw = svc.login("grace", "wrong").await.unwrap_err();
        let unknown = svc.login("nobody", "wrong").await.unwrap_err();
        assert_eq!(wrong_pw.to_string(), unknown.to_string());
    }
}
