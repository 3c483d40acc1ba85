//! The two wire transports in front of the shared [`CallCodec`].
//!
//! - `GET /ws-rpc`: one WebSocket per client, one call per frame
//! - `POST /http-rpc`: one call per request body
//!
//! [`CallCodec`]: ytdlp_webui_core::CallCodec

pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

/// Build the RPC transport sub-router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws-rpc", get(ws::ws_rpc_handler))
        .route("/http-rpc", post(http::http_rpc_handler))
}
