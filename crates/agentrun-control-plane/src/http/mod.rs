//! HTTP server for the control plane.
//!
//! Provides endpoints for:
//! - Task submission (`/v1/projects/:project/tasks`)
//! - Project state queries (`/v1/projects/...`)
//! - Live progress as Server-Sent Events (`/v1/projects/:project/events`)
//! - Token counting (`/v1/tokens`)
//! - Status, health check and Prometheus metrics

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::state::AppState;

mod handlers;
pub mod responses;

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    // CORS layer for browser frontends
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Task routes
        .route("/v1/projects", get(handlers::list_projects))
        .route("/v1/projects/:project/tasks", post(handlers::submit_task))
        .route("/v1/projects/:project/events", get(handlers::project_events))
        // Project state routes
        .route("/v1/projects/:project/state", get(handlers::get_state))
        .route("/v1/projects/:project/active", get(handlers::get_active))
        .route(
            "/v1/projects/:project/browser-session",
            get(handlers::get_browser_session),
        )
        .route(
            "/v1/projects/:project/terminal-session",
            get(handlers::get_terminal_session),
        )
        .route(
            "/v1/projects/:project/token-usage",
            get(handlers::get_token_usage),
        )
        .route("/v1/projects/:project/messages", get(handlers::get_messages))
        .route("/v1/tokens", post(handlers::calculate_tokens))
        // Observability routes
        .route("/v1/status", get(handlers::server_status))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API on `listener` until `signal` resolves.
///
/// Once the signal fires, open progress streams are ended so that the
/// graceful shutdown does not wait on them.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    signal: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let router = create_router(state.clone());
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            signal.await;
            info!("Shutdown requested, closing progress streams");
            state.begin_shutdown();
        })
        .await
}
