use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_sessions::Session;

use super::auth::get_session_username;
use super::{ApiError, ApiResponse, AppState, SuccessResponse};
use crate::db::EventInput;
use crate::entities::events;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// YYYY-MM
    pub month: String,
}

#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub title: String,
    pub event_date: String,
    pub event_time: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    #[serde(default = "default_visibility")]
    pub visibility: String,
}

fn default_visibility() -> String {
    "community".to_string()
}

/// Strict YYYY-MM. The month filter is a string prefix match, so accepting
/// unpadded input ("2026-8") would silently match nothing.
fn valid_month(month: &str) -> bool {
    let Some((year, month_part)) = month.split_once('-') else {
        return false;
    };
    year.len() == 4
        && month_part.len() == 2
        && year.chars().all(|c| c.is_ascii_digit())
        && month_part.chars().all(|c| c.is_ascii_digit())
        && matches!(month_part.parse::<u32>(), Ok(1..=12))
}

impl EventRequest {
    fn validate(self) -> Result<EventInput, ApiError> {
        if self.title.trim().is_empty() {
            return Err(ApiError::validation("Event title is required"));
        }

        if chrono::NaiveDate::parse_from_str(&self.event_date, "%Y-%m-%d").is_err() {
            return Err(ApiError::validation("Event date must be YYYY-MM-DD"));
        }

        if !matches!(self.visibility.as_str(), "community" | "personal") {
            return Err(ApiError::validation(
                "Visibility must be 'community' or 'personal'",
            ));
        }

        Ok(EventInput {
            title: self.title.trim().to_string(),
            event_date: self.event_date,
            event_time: self.event_time.filter(|t| !t.is_empty()),
            description: self.description.filter(|d| !d.is_empty()),
            location: self.location.filter(|l| !l.is_empty()),
            visibility: self.visibility,
        })
    }
}

/// GET /events?month=YYYY-MM
/// Community events plus the caller's own personal events
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    session: Session,
    Query(query): Query<EventsQuery>,
) -> Result<Json<ApiResponse<Vec<events::Model>>>, ApiError> {
    let username = get_session_username(&session).await?;

    if !valid_month(&query.month) {
        return Err(ApiError::validation("Month must be YYYY-MM"));
    }

    let events = state
        .store()
        .events_for_month(&query.month, &username)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to list events: {e}")))?;

    Ok(Json(ApiResponse::success(events)))
}

/// POST /events
pub async fn create_event(
    State(state): State<Arc<AppState>>,
    session: Session,
    Json(payload): Json<EventRequest>,
) -> Result<(StatusCode, Json<ApiResponse<events::Model>>), ApiError> {
    let username = get_session_username(&session).await?;
    let input = payload.validate()?;

    let event = state
        .store()
        .create_event(&username, input)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to create event: {e}")))?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(event))))
}

/// PUT /events/{id}
/// Owner or admin only
pub async fn update_event(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(id): Path<i32>,
    Json(payload): Json<EventRequest>,
) -> Result<Json<ApiResponse<events::Model>>, ApiError> {
    require_owner_or_admin(&state, &session, id).await?;
    let input = payload.validate()?;

    let event = state
        .store()
        .update_event(id, input)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to update event: {e}")))?
        .ok_or_else(|| ApiError::not_found("Event", id))?;

    Ok(Json(ApiResponse::success(event)))
}

/// DELETE /events/{id}
/// Owner or admin only
pub async fn delete_event(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<SuccessResponse>>, ApiError> {
    require_owner_or_admin(&state, &session, id).await?;

    let deleted = state
        .store()
        .delete_event(id)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to delete event: {e}")))?;

    if !deleted {
        return Err(ApiError::not_found("Event", id));
    }

    Ok(Json(ApiResponse::success(SuccessResponse {
        success: true,
    })))
}

async fn require_owner_or_admin(
    state: &Arc<AppState>,
    session: &Session,
    event_id: i32,
) -> Result<(), ApiError> {
    let caller = get_session_username(session).await?;

    let event = state
        .store()
        .get_event(event_id)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to load event: {e}")))?
        .ok_or_else(|| ApiError::not_found("Event", event_id))?;

    if event.created_by == caller {
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
            "Only the event owner or an admin may modify it".to_string(),
        ))
    }
}
