//! API route configuration.

use std::sync::Arc;

use axum::{routing::get, Router};

use crate::handlers;
use crate::state::AppState;

/// Creates the API router with all routes configured.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))

        // Rendering
        .route(
            "/api/render",
            get(handlers::render_get).post(handlers::render_post),
        )

        // Cache
        .route("/api/cache/stats", get(handlers::cache_stats))

        .with_state(state)
}
