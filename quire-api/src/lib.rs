//! # Quire API Server
//!
//! HTTP front end for rendering web pages to PDF and images.
//!
//! ## Endpoints
//!
//! - `GET /health` - Liveness and version
//! - `GET /api/render` - Render with options from the query string
//! - `POST /api/render` - Render from a JSON body or an HTML body; identical
//!   concurrent requests share a single render
//! - `GET /api/cache/stats` - Render store and coalescer counters
//!
//! ## Example
//!
//! ```rust,ignore
//! use quire_api::{ApiServer, ApiConfig};
//!
//! let config = ApiConfig::from_env();
//! let server = ApiServer::new(config);
//! server.run(([0, 0, 0, 0], 9000)).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod routes;
mod handlers;
mod state;
mod error;

pub use routes::create_router;
pub use state::{AppState, ApiConfig};
pub use error::ApiError;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use quire_core::error::Result;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// API server for Quire.
pub struct ApiServer {
    state: Arc<AppState>,
}

impl ApiServer {
    /// Creates a new API server with the given configuration.
    pub fn new(config: ApiConfig) -> Self {
        Self::with_state(Arc::new(AppState::new(config)))
    }

    /// Creates a server around existing state.
    pub fn with_state(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Shared state.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Creates the router with all routes configured.
    pub fn router(&self) -> Router {
        let mut router = create_router(self.state.clone())
            .layer(DefaultBodyLimit::disable())
            .layer(RequestBodyLimitLayer::new(self.state.config.max_body_bytes));

        if self.state.config.allow_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        router.layer(TraceLayer::new_for_http())
    }

    /// Runs the server on the given address until ctrl-c.
    ///
    /// Starts the store's background sweep, and flushes the store once the
    /// server has stopped.
    pub async fn run(self, addr: impl Into<SocketAddr>) -> Result<()> {
        self.state.config.cache.validate()?;

        let addr = addr.into();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let sweeper = self.state.store.spawn_sweeper();

        info!(
            %addr,
            renderer = self.state.renderer.name(),
            ttl_s = self.state.config.cache.default_ttl_seconds,
            "Quire API server listening"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        sweeper.abort();
        self.state.store.flush();
        info!("Server stopped, render store flushed");
        Ok(())
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; run until the process is killed.
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Starts the API server with configuration from the environment.
pub async fn start_server(port: u16) -> Result<()> {
    let config = ApiConfig::from_env();
    let server = ApiServer::new(config);
    server.run(([0, 0, 0, 0], port)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_body_limit() {
        let config = ApiConfig {
            max_body_bytes: 16,
            ..ApiConfig::default()
        };
        let server = ApiServer::new(config);

        let response = server
            .router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/render")
                    .header(header::CONTENT_TYPE, "text/html")
                    .body(Body::from("<p>".repeat(64)))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let server = ApiServer::new(ApiConfig::default());

        let response = server
            .router()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::ORIGIN, "https://app.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }
}
