use axum::routing::post;
use axum::Router;

use crate::handlers::sequence;
use crate::state::AppState;

/// Sequence routes, mounted under `/sequences`.
///
/// ```text
/// POST /{type}/generate   -> generate
/// POST /{type}/validate   -> validate
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{type}/generate", post(sequence::generate))
        .route("/{type}/validate", post(sequence::validate))
}
