use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware,
    routing::{delete, get, post, put},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};

use time;

use crate::config::Config;
use crate::state::SharedState;

pub mod admin;
pub mod auth;
pub mod calendar;
mod error;
pub mod invites;
mod types;
pub mod users;

pub use error::ApiError;
pub use types::*;

use tokio::sync::RwLock;

#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<SharedState>,
}

impl AppState {
    #[must_use]
    pub fn config(&self) -> &Arc<RwLock<Config>> {
        &self.shared.config
    }

    #[must_use]
    pub fn store(&self) -> &crate::db::Store {
        &self.shared.store
    }

    #[must_use]
    pub fn auth_service(&self) -> &Arc<dyn crate::services::AuthService> {
        &self.shared.auth_service
    }
}

pub async fn create_app_state(shared: Arc<SharedState>) -> anyhow::Result<Arc<AppState>> {
    Ok(Arc::new(AppState { shared }))
}

pub async fn create_app_state_from_config(config: Config) -> anyhow::Result<Arc<AppState>> {
    let shared = Arc::new(SharedState::new(config).await?);
    create_app_state(shared).await
}

pub async fn router(state: Arc<AppState>) -> Router {
    let (photos_path, cors_origins, session_ttl_minutes, max_photo_bytes) = {
        let config = state.config().read().await;
        (
            config.uploads.photos_path.clone(),
            config.server.cors_allowed_origins.clone(),
            config.server.session_ttl_minutes,
            config.uploads.max_photo_bytes,
        )
    };

    let protected_routes = create_protected_router();
    let admin_routes = create_admin_router(state.clone());

    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false)
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(
            session_ttl_minutes,
        )));

    let api_router = Router::new()
        .merge(protected_routes)
        .nest("/admin", admin_routes)
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/marker-colors", get(users::marker_colors))
        .layer(session_layer)
        // Framework default is 2 MiB; without this, a configured photo cap
        // above that is unreachable. 64 KiB headroom for multipart framing.
        .layer(DefaultBodyLimit::max(max_photo_bytes + 64 * 1024))
        .with_state(state.clone());

    let cors_layer = if cors_origins.contains(&"*".to_string()) {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|s| s.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .nest("/api", api_router)
        .nest_service("/photos", tower_http::services::ServeDir::new(photos_path))
        .layer(cors_layer.allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
}

fn create_protected_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/me", get(auth::get_current_user))
        .route("/users", get(users::list_members))
        .route("/user/{username}", get(users::get_user))
        .route("/user/{username}", put(users::update_user))
        .route("/user/{username}/password", put(users::change_password))
        .route("/user/{username}/photo", post(users::upload_photo))
        .route("/user/{username}/photo", delete(users::delete_photo))
        .route("/invite", post(invites::create_invite))
        .route("/events", get(calendar::list_events))
        .route("/events", post(calendar::create_event))
        .route("/events/{id}", put(calendar::update_event))
        .route("/events/{id}", delete(calendar::delete_event))
        .route_layer(middleware::from_fn(auth::auth_middleware))
}

fn create_admin_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/users", get(admin::list_users))
        .route("/user/{username}", delete(admin::delete_user))
        .route("/export", get(admin::export_data))
        .route("/import", post(admin::import_data))
        .route("/invites", get(invites::list_invites))
        .route("/invite/{token}", delete(invites::revoke_invite))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::admin_middleware,
        ))
}
