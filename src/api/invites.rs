use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;
use std::sync::Arc;
use tower_sessions::Session;

use super::auth::get_session_username;
use super::{ApiError, ApiResponse, AppState, InviteDto, SuccessResponse};
use crate::db::RevokeOutcome;

#[derive(Debug, Serialize)]
pub struct InviteCreatedResponse {
    pub token: String,
}

/// POST /invite
/// Mint a new single-use invite token bound to the caller as issuer
pub async fn create_invite(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<ApiResponse<InviteCreatedResponse>>, ApiError> {
    let username = get_session_username(&session).await?;

    let invite = state
        .store()
        .create_invite(&username)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to create invite: {e}")))?;

    tracing::info!("Invite minted by '{username}'");

    Ok(Json(ApiResponse::success(InviteCreatedResponse {
        token: invite.token,
    })))
}

/// GET /admin/invites
pub async fn list_invites(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<InviteDto>>>, ApiError> {
    let invites = state
        .store()
        .list_invites()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to list invites: {e}")))?;

    let dtos = invites.into_iter().map(InviteDto::from).collect();
    Ok(Json(ApiResponse::success(dtos)))
}

/// DELETE /admin/invite/{token}
/// Revoke an unused token. A used token can never be revoked.
pub async fn revoke_invite(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<ApiResponse<SuccessResponse>>, ApiError> {
    let outcome = state
        .store()
        .revoke_invite(&token)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to revoke invite: {e}")))?;

    match outcome {
        RevokeOutcome::Revoked => Ok(Json(ApiResponse::success(SuccessResponse {
            success: true,
        }))),
        RevokeOutcome::AlreadyUsed => Err(ApiError::validation(
            "Cannot revoke an invite token that has been used",
        )),
        RevokeOutcome::NotFound => Err(ApiError::not_found("Invite", &token)),
    }
}
