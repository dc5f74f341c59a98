use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_sessions::Session;

use super::auth::get_session_username;
use super::users::remove_photo_file;
use super::{AdminUserDto, ApiError, ApiResponse, AppState, SuccessResponse};
use crate::entities::{events, users};

// ============================================================================
// Export / Import Types
// ============================================================================

/// Exported user record. Password hashes are included (never plaintext) so
/// a later import restores working accounts.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserExport {
    pub username: String,
    pub password_hash: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default = "default_marker_color")]
    pub marker_color: String,
    #[serde(default)]
    pub photo: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

fn default_marker_color() -> String {
    "red".to_string()
}

impl From<users::Model> for UserExport {
    fn from(model: users::Model) -> Self {
        Self {
            username: model.username,
            password_hash: model.password_hash,
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

impl From<UserExport> for users::Model {
    fn from(export: UserExport) -> Self {
        Self {
            id: 0,
            username: export.username,
            password_hash: export.password_hash,
            full_name: export.full_name,
            location: export.location,
            latitude: export.latitude,
            longitude: export.longitude,
            marker_color: export.marker_color,
            photo: export.photo,
            is_admin: export.is_admin,
            created_at: export.created_at,
            updated_at: export.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventExport {
    pub title: String,
    pub event_date: String,
    #[serde(default)]
    pub event_time: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default = "default_visibility")]
    pub visibility: String,
    pub created_by: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

fn default_visibility() -> String {
    "community".to_string()
}

impl From<events::Model> for EventExport {
    fn from(model: events::Model) -> Self {
        Self {
            title: model.title,
            event_date: model.event_date,
            event_time: model.event_time,
            description: model.description,
            location: model.location,
            visibility: model.visibility,
            created_by: model.created_by,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

impl From<EventExport> for events::Model {
    fn from(export: EventExport) -> Self {
        Self {
            id: 0,
            title: export.title,
            event_date: export.event_date,
            event_time: export.event_time,
            description: export.description,
            location: export.location,
            visibility: export.visibility,
            created_by: export.created_by,
            created_at: export.created_at,
            updated_at: export.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub users: Vec<UserExport>,
    pub events: Vec<EventExport>,
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub users: Vec<UserExport>,
    #[serde(default)]
    pub events: Vec<EventExport>,
    #[serde(default = "default_mode")]
    pub mode: String,
}

fn default_mode() -> String {
    "merge".to_string()
}

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub success: bool,
    pub count: u64,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /admin/users
/// Full member list, including role flags and timestamps
pub async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<AdminUserDto>>>, ApiError> {
    let users = state
        .store()
        .list_users()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to list users: {e}")))?;

    let dtos = users.into_iter().map(AdminUserDto::from).collect();
    Ok(Json(ApiResponse::success(dtos)))
}

/// DELETE /admin/user/{username}
/// Delete a member. Invite rows that reference them stay intact.
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(username): Path<String>,
) -> Result<Json<ApiResponse<SuccessResponse>>, ApiError> {
    let caller = get_session_username(&session).await?;
    if caller == username {
        return Err(ApiError::validation("Cannot delete your own account"));
    }

    let deleted = state
        .store()
        .delete_user(&username)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to delete user: {e}")))?
        .ok_or_else(|| ApiError::not_found("User", &username))?;

    let photos_path = state.config().read().await.uploads.photos_path.clone();
    remove_photo_file(&photos_path, deleted.photo).await;

    tracing::info!("User '{username}' deleted by admin '{caller}'");

    Ok(Json(ApiResponse::success(SuccessResponse {
        success: true,
    })))
}

/// GET /admin/export
pub async fn export_data(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<ExportResponse>>, ApiError> {
    let users = state
        .store()
        .list_user_models()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to export users: {e}")))?;

    let events = state
        .store()
        .list_all_events()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to export events: {e}")))?;

    Ok(Json(ApiResponse::success(ExportResponse {
        users: users.into_iter().map(UserExport::from).collect(),
        events: events.into_iter().map(EventExport::from).collect(),
    })))
}

/// POST /admin/import
/// `mode: "merge"` upserts by username; `"replace"` clears first
pub async fn import_data(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ImportRequest>,
) -> Result<Json<ApiResponse<ImportResponse>>, ApiError> {
    let replace = match payload.mode.as_str() {
        "merge" => false,
        "replace" => true,
        other => {
            return Err(ApiError::validation(format!(
                "Unknown import mode '{other}'"
            )));
        }
    };

    for user in &payload.users {
        if user.username.is_empty() || user.password_hash.is_empty() {
            return Err(ApiError::validation(
                "Imported users need a username and a password hash",
            ));
        }
    }

    let count = state
        .store()
        .import_users(
            payload.users.into_iter().map(users::Model::from).collect(),
            replace,
        )
        .await
        .map_err(|e| ApiError::internal(format!("Failed to import users: {e}")))?;

    if !payload.events.is_empty() || replace {
        state
            .store()
            .import_events(
                payload
                    .events
                    .into_iter()
                    .map(events::Model::from)
                    .collect(),
                replace,
            )
            .await
            .map_err(|e| ApiError::internal(format!("Failed to import events: {e}")))?;
    }

    Ok(Json(ApiResponse::success(ImportResponse {
        success: true,
        count,
    })))
}
