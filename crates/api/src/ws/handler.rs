use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use waybill_core::error::CoreError;
use waybill_core::permissions::Principal;

use crate::error::AppError;
use crate::middleware::auth::{AuthUser, RemoteAddr};
use crate::state::AppState;
use crate::ws::client;
use crate::ws::hub::Client;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub room: Option<String>,
}

/// Authenticate, then upgrade the connection and hand it to the hub.
///
/// `?room=` joins a room for the lifetime of the connection.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    AuthUser(principal): AuthUser,
    RemoteAddr(remote_addr): RemoteAddr,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    let room = params.room.filter(|r| !r.is_empty());
    if let Some(room) = &room {
        if !may_join(&principal, room) {
            return AppError::Core(CoreError::Forbidden(format!(
                "Room {room} belongs to another organization"
            )))
            .into_response();
        }
    }

    tracing::info!(
        user_id = %principal.user_id,
        org_id = %principal.organization_id,
        room = ?room,
        remote_addr = %remote_addr,
        "WebSocket upgrade",
    );
    let (conn, outbound) = Client::new(
        principal.user_id,
        principal.organization_id,
        room,
        remote_addr,
    );
    ws.on_upgrade(move |socket| client::serve(socket, state.hub, conn, outbound))
}

/// Derived rooms (`org_`, `user_`, `role_`) are joinable only inside the
/// caller's organization, and a user room only by its user.
pub(crate) fn may_join(principal: &Principal, room: &str) -> bool {
    room_in_tenant(
        principal.organization_id.as_str(),
        principal.user_id.as_str(),
        room,
    )
}

/// [`may_join`] for a connection that only carries its org and user ids.
pub(crate) fn room_in_tenant(org: &str, user: &str, room: &str) -> bool {
    if let Some(rest) = room.strip_prefix("org_") {
        return rest == org;
    }
    if let Some(rest) = room.strip_prefix("user_") {
        return rest == format!("{org}_{user}");
    }
    if let Some(rest) = room.strip_prefix("role_") {
        return rest.starts_with(&format!("{org}_"));
    }
    true
}
