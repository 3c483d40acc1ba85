// crates/server/src/lib.rs
//! ytdlp-webui server library.
//!
//! This crate provides the Axum-based server: the stream and unary RPC
//! transports in front of the download service, the download-directory
//! routes, and the process lifecycle around the durable job registry.

pub mod config;
pub mod connections;
pub mod downloader;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod routes;
pub mod service;
pub mod state;
pub mod transport;

pub use config::Config;
pub use error::*;
pub use lifecycle::{Lifecycle, LifecycleError};
pub use crate::metrics::{init_metrics, render_metrics};
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API and RPC routes
/// - the static frontend for every other path, when a directory is configured
/// - CORS (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let static_dir = state.static_dir.clone();
    let mut app = api_routes(state);

    match static_dir {
        Some(dir) if dir.is_dir() => {
            tracing::info!(dir = %dir.display(), "serving static frontend");
            let index = dir.join("index.html");
            app = app.fallback_service(ServeDir::new(dir).fallback(ServeFile::new(index)));
        }
        Some(dir) => {
            tracing::warn!(dir = %dir.display(), "static directory missing, running API-only");
        }
        None => {}
    }

    app.layer(cors).layer(TraceLayer::new_for_http())
}

// ============================================================================
// Integration Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;
    use ytdlp_webui_core::Registry;

    fn test_state(dir: &TempDir, static_dir: Option<std::path::PathBuf>) -> Arc<AppState> {
        let mut config = Config::for_dir(dir.path());
        config.static_dir = static_dir;
        let registry = Arc::new(Registry::new(config.snapshot_path()));
        AppState::new(&config, registry, CancellationToken::new())
    }

    /// Helper to make a GET request to the app.
    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body_str = String::from_utf8(body.to_vec()).unwrap();

        (status, body_str)
    }

    // ========================================================================
    // Health Endpoint Tests
    // ========================================================================

    #[tokio::test]
    async fn test_health_endpoint_response_structure() {
        let dir = TempDir::new().unwrap();
        let app = create_app(test_state(&dir, None));
        let (status, body) = get(app, "/api/health").await;

        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert!(json["uptime_secs"].is_number());
        assert_eq!(json["jobs"], 0);
        assert_eq!(json["connections"], 0);
    }

    // ========================================================================
    // CORS Tests
    // ========================================================================

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let dir = TempDir::new().unwrap();
        let app = create_app(test_state(&dir, None));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .header("Origin", "http://example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let allow_origin = response.headers().get("access-control-allow-origin");
        assert_eq!(allow_origin.unwrap(), "*");
    }

    // ========================================================================
    // Static frontend and redirects
    // ========================================================================

    #[tokio::test]
    async fn test_api_only_mode_has_no_root() {
        let dir = TempDir::new().unwrap();
        let app = create_app(test_state(&dir, None));
        let (status, _body) = get(app, "/").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_static_frontend_served() {
        let dir = TempDir::new().unwrap();
        let dist = dir.path().join("dist");
        std::fs::create_dir_all(&dist).unwrap();
        std::fs::write(dist.join("index.html"), "<html>webui</html>").unwrap();

        let app = create_app(test_state(&dir, Some(dist)));
        let (status, body) = get(app.clone(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("webui"));

        // Unknown client-side paths fall back to index.html
        let (status, body) = get(app, "/some/client/route").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("webui"));
    }

    #[tokio::test]
    async fn test_client_routes_redirect_to_root() {
        let dir = TempDir::new().unwrap();
        for uri in ["/settings", "/archive"] {
            let app = create_app(test_state(&dir, None));
            let response = app
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::SEE_OTHER);
            assert_eq!(response.headers()["location"], "/");
        }
    }
}
