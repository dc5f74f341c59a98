use serde::Serialize;

use crate::db::User;
use crate::entities::invites;
use crate::services::Coordinates;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub const fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Public member view, as shown on the shared map
#[derive(Debug, Serialize)]
pub struct MemberDto {
    pub username: String,
    pub full_name: String,
    pub location: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub marker_color: String,
    pub photo: Option<String>,
}

impl From<User> for MemberDto {
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
        }
    }
}

/// Admin view of a member, including role and timestamps
#[derive(Debug, Serialize)]
pub struct AdminUserDto {
    pub username: String,
    pub full_name: String,
    pub location: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub marker_color: String,
    pub photo: Option<String>,
    pub is_admin: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<User> for AdminUserDto {
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
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Invite ledger row as shown on the admin dashboard.
/// The token itself is included; listing is admin-only.
#[derive(Debug, Serialize)]
pub struct InviteDto {
    pub token: String,
    pub created_by: String,
    pub created_at: String,
    pub used_by: Option<String>,
    pub used_at: Option<String>,
    pub revoked: bool,
}

impl From<invites::Model> for InviteDto {
    fn from(model: invites::Model) -> Self {
        Self {
            token: model.token,
            created_by: model.created_by,
            created_at: model.created_at,
            used_by: model.used_by,
            used_at: model.used_at,
            revoked: model.revoked,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}
