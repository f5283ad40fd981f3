use axum::routing::get;
use axum::Router;

use crate::handlers::preference;
use crate::state::AppState;

/// Notification preference routes. Paths keep their trailing slash.
///
/// ```text
/// GET    /notification-preferences/             -> list_preferences
/// POST   /notification-preferences/             -> create_preference
/// GET    /notification-preferences/user/        -> list_user_preferences (?userId)
/// GET    /notification-preferences/{id}/        -> get_preference
/// PUT    /notification-preferences/{id}/        -> update_preference
/// DELETE /notification-preferences/{id}/        -> delete_preference
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/notification-preferences/",
            get(preference::list_preferences).post(preference::create_preference),
        )
        .route(
            "/notification-preferences/user/",
            get(preference::list_user_preferences),
        )
        .route(
            "/notification-preferences/{id}/",
            get(preference::get_preference)
                .put(preference::update_preference)
                .delete(preference::delete_preference),
        )
}
