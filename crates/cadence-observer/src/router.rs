//! Axum router construction.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the observer router.
///
/// CORS allows any origin so dashboards on another port can poll it.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/stats", get(handlers::stats))
        .route("/systems", get(handlers::systems))
        .route("/cache", get(handlers::cache))
        .route("/snapshot", get(handlers::latest_snapshot))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
