use axum::routing::get;
use axum::Router;

use crate::handlers::presence;
use crate::state::AppState;

/// Presence routes, mounted under `/presence`.
///
/// ```text
/// GET /org                      -> org_users
/// GET /users/{id}/connections   -> user_connections
/// GET /rooms/{room}             -> room_users
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/org", get(presence::org_users))
        .route("/users/{id}/connections", get(presence::user_connections))
        .route("/rooms/{room}", get(presence::room_users))
}
