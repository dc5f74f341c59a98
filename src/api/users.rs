use axum::{
    Json,
    extract::{Multipart, Path, State},
};
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use tower_sessions::Session;

use super::auth::get_session_username;
use super::{ApiError, ApiResponse, AppState, MemberDto, MessageResponse};
use crate::db::ProfileUpdate;
use crate::services::UserSession;

/// Marker colors the map UI knows how to render
pub const MARKER_COLORS: &[&str] = &[
    "red", "blue", "green", "yellow", "purple", "orange", "pink", "ltblue",
];

const ALLOWED_PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

// ============================================================================
// Request Types
// ============================================================================

/// Distinguishes "field absent" (keep) from "field null" (clear)
fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(de).map(Some)
}

#[derive(Deserialize)]
pub struct UpdateProfileRequest {
    pub full_name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub location: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub latitude: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub longitude: Option<Option<f64>>,
    pub marker_color: Option<String>,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /users
/// All members, for the shared map
pub async fn list_members(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<MemberDto>>>, ApiError> {
    let users = state
        .store()
        .list_users()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to list users: {e}")))?;

    let members = users.into_iter().map(MemberDto::from).collect();
    Ok(Json(ApiResponse::success(members)))
}

/// GET /user/{username}
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<ApiResponse<UserSession>>, ApiError> {
    let user = state
        .store()
        .get_user_by_username(&username)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to get user: {e}")))?
        .ok_or_else(|| ApiError::not_found("User", &username))?;

    Ok(Json(ApiResponse::success(UserSession::from(user))))
}

/// PUT /user/{username}
/// Update profile attributes. Members may edit themselves; admins anyone.
/// The username itself is immutable.
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(username): Path<String>,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<ApiResponse<UserSession>>, ApiError> {
    require_self_or_admin(&state, &session, &username).await?;

    if let Some(color) = &payload.marker_color
        && !MARKER_COLORS.contains(&color.as_str())
    {
        return Err(ApiError::validation(format!(
            "Unknown marker color '{color}'"
        )));
    }

    let update = ProfileUpdate {
        full_name: payload.full_name,
        location: payload.location,
        latitude: payload.latitude,
        longitude: payload.longitude,
        marker_color: payload.marker_color,
    };

    let user = state
        .store()
        .update_user_profile(&username, update)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to update user: {e}")))?
        .ok_or_else(|| ApiError::not_found("User", &username))?;

    Ok(Json(ApiResponse::success(UserSession::from(user))))
}

/// PUT /user/{username}/password
/// Change password (requires current password verification)
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(username): Path<String>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let caller = get_session_username(&session).await?;
    if caller != username {
        return Err(ApiError::Forbidden(
            "Cannot change another member's password".to_string(),
        ));
    }

    state
        .auth_service()
        .change_password(&username, &payload.current_password, &payload.new_password)
        .await?;

    tracing::info!("Password changed for user: {username}");

    Ok(Json(ApiResponse::success(MessageResponse {
        message: "Password updated successfully".to_string(),
    })))
}

/// POST /user/{username}/photo
/// Multipart profile photo upload; replaces any previous photo file
pub async fn upload_photo(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(username): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<UserSession>>, ApiError> {
    require_self_or_admin(&state, &session, &username).await?;

    let (photos_path, max_bytes) = {
        let config = state.config().read().await;
        (
            config.uploads.photos_path.clone(),
            config.uploads.max_photo_bytes,
        )
    };

    let mut stored: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some("photo") {
            continue;
        }

        let extension = field
            .file_name()
            .and_then(|name| name.rsplit('.').next())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if !ALLOWED_PHOTO_EXTENSIONS.contains(&extension.as_str()) {
            return Err(ApiError::validation(
                "Photo must be a jpg, jpeg, png, gif or webp file",
            ));
        }

        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::validation(format!("Failed to read photo: {e}")))?;

        if data.is_empty() {
            return Err(ApiError::validation("Photo file is empty"));
        }
        if data.len() > max_bytes {
            return Err(ApiError::validation(format!(
                "Photo exceeds the maximum size of {max_bytes} bytes"
            )));
        }

        let filename = format!("{}.{extension}", uuid::Uuid::new_v4());

        tokio::fs::create_dir_all(&photos_path)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to create photos dir: {e}")))?;
        tokio::fs::write(std::path::Path::new(&photos_path).join(&filename), &data)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to store photo: {e}")))?;

        stored = Some(filename);
        break;
    }

    let Some(filename) = stored else {
        return Err(ApiError::validation("Missing 'photo' field"));
    };

    let photo_url = format!("/photos/{filename}");

    let previous = state
        .store()
        .set_user_photo(&username, Some(photo_url))
        .await
        .map_err(|e| ApiError::internal(format!("Failed to update photo: {e}")))?
        .ok_or_else(|| ApiError::not_found("User", &username))?;

    remove_photo_file(&photos_path, previous).await;

    let user = state.auth_service().session_for(&username).await?;
    Ok(Json(ApiResponse::success(user)))
}

/// DELETE /user/{username}/photo
pub async fn delete_photo(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(username): Path<String>,
) -> Result<Json<ApiResponse<UserSession>>, ApiError> {
    require_self_or_admin(&state, &session, &username).await?;

    let photos_path = state.config().read().await.uploads.photos_path.clone();

    let previous = state
        .store()
        .set_user_photo(&username, None)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to clear photo: {e}")))?
        .ok_or_else(|| ApiError::not_found("User", &username))?;

    remove_photo_file(&photos_path, previous).await;

    let user = state.auth_service().session_for(&username).await?;
    Ok(Json(ApiResponse::success(user)))
}

/// GET /marker-colors
pub async fn marker_colors() -> Json<ApiResponse<Vec<&'static str>>> {
    Json(ApiResponse::success(MARKER_COLORS.to_vec()))
}

// ============================================================================
// Helpers
// ============================================================================

/// Allow the member themselves or any admin
async fn require_self_or_admin(
    state: &Arc<AppState>,
    session: &Session,
    username: &str,
) -> Result<(), ApiError> {
    let caller = get_session_username(session).await?;
    if caller == username {
        return Ok(());
    }

    let caller_user = state
        .store()
        .get_user_by_username(&caller)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to load user: {e}")))?
        .ok_or_else(|| ApiError::Unauthorized("Not authenticated".to_string()))?;

    if caller_user.is_admin {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "Cannot modify another member's profile".to_string(),
        ))
    }
}

/// Best-effort removal of a replaced or deleted photo file
pub(super) async fn remove_photo_file(photos_path: &str, previous: Option<String>) {
    if let Some(previous) = previous
        && let Some(filename) = previous.strip_prefix("/photos/")
    {
        let path = std::path::Path::new(photos_path).join(filename);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::debug!("Could not remove old photo {}: {e}", path.display());
        }
    }
}
