pub mod health;
pub mod notification;
pub mod preference;
pub mod presence;
pub mod sequence;

use axum::Router;

use crate::state::AppState;

/// All authenticated REST routes, nested under `/api/v1` by the app router.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/notifications", notification::router())
        .nest("/presence", presence::router())
        .nest("/sequences", sequence::router())
        .merge(preference::router())
}
