pub mod graph;
pub mod sessions;
pub mod stream;

use axum::Router;
use draftgate_core::state::AppState;

/// Build the complete API router with all sub-routes.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/graph", graph::router())
        .nest("/graph/stream", stream::router())
        .nest("/graph/sessions", sessions::router())
}
