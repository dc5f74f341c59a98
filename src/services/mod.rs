pub mod auth_service;
pub use auth_service::{AuthError, AuthService, Coordinates, RegisterError, UserSession};

pub mod auth_service_impl;
pub use auth_service_impl::SeaOrmAuthService;
