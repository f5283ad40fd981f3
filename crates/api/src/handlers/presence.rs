//! Read-only views over the presence sets the hub maintains.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;
use waybill_core::error::CoreError;
use waybill_core::rooms::presence_keys;
use waybill_core::types::PulId;
use waybill_notifications::PresenceStore;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;
use crate::ws::may_join;

type PresenceResponse = Json<DataResponse<serde_json::Value>>;

/// GET /api/v1/presence/org
///
/// Users with at least one live connection in the caller's organization.
pub async fn org_users(auth: AuthUser, State(state): State<AppState>) -> AppResult<PresenceResponse> {
    let users = state
        .presence
        .members(&presence_keys::org_clients(auth.organization_id.as_str()))
        .await
        .map_err(CoreError::from)?;
    Ok(Json(DataResponse {
        data: json!({ "organizationId": auth.organization_id, "users": users }),
    }))
}

/// GET /api/v1/presence/users/{id}/connections
///
/// Remote addresses of a user's live connections; own, or any user in the
/// organization with `user:manage`.
pub async fn user_connections(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(user_id): Path<PulId>,
) -> AppResult<PresenceResponse> {
    if !auth.can_act_for(&user_id, &auth.organization_id) {
        return Err(CoreError::Forbidden("Not allowed to view this user's connections".into()).into());
    }
    let connections = state
        .presence
        .members(&presence_keys::user_connections(user_id.as_str()))
        .await
        .map_err(CoreError::from)?;
    Ok(Json(DataResponse {
        data: json!({ "userId": user_id, "connections": connections }),
    }))
}

/// GET /api/v1/presence/rooms/{room}
pub async fn room_users(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(room): Path<String>,
) -> AppResult<PresenceResponse> {
    if !may_join(&auth, &room) {
        return Err(CoreError::Forbidden(format!("Room {room} belongs to another organization")).into());
    }
    let users = state
        .presence
        .members(&presence_keys::room_users(&room))
        .await
        .map_err(CoreError::from)?;
    Ok(Json(DataResponse {
        data: json!({ "room": room, "users": users }),
    }))
}
