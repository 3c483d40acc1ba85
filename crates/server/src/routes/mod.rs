//! HTTP route handlers for the web UI server.

pub mod files;
pub mod health;
pub mod metrics;

use std::sync::Arc;

use axum::{response::Redirect, routing::get, Router};

use crate::state::AppState;
use crate::transport;

/// Create the combined router with every route.
///
/// Routes:
/// - GET  /api/health - Health check
/// - GET  /api/metrics - Prometheus metrics
/// - GET  /ws-rpc - Stream RPC transport (WebSocket)
/// - POST /http-rpc - Unary RPC transport
/// - POST /downloaded - List downloaded files
/// - POST /delete - Delete a downloaded file
/// - GET  /d/{id} - Download a file
/// - GET  /settings, /archive - Client-side routes, redirected to /
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", metrics::router())
        .merge(transport::router())
        .merge(files::router())
        .route("/settings", get(|| async { Redirect::to("/") }))
        .route("/archive", get(|| async { Redirect::to("/") }))
        .with_state(state)
}
