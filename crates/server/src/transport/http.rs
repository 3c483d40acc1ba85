//! Unary transport: one call per `POST /http-rpc` request.
//!
//! The body is handed to the codec as a stream, so decoding starts before the
//! whole request has arrived.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::TryStreamExt;
use tokio_util::io::StreamReader;

use crate::error::{ApiError, ApiResult};
use crate::metrics::CallTimer;
use crate::state::AppState;

/// POST /http-rpc - decode, dispatch and answer exactly one call.
///
/// Call failures (unknown method, malformed payload, service errors) are
/// encoded in a 200 reply. Only a broken request body fails the exchange.
pub async fn http_rpc_handler(
    State(state): State<Arc<AppState>>,
    body: Body,
) -> ApiResult<Response> {
    let stream = body
        .into_data_stream()
        .map_err(std::io::Error::other);
    let reader = StreamReader::new(stream);

    let timer = CallTimer::new("http");
    let reply = match state.codec.dispatch(reader).await {
        Ok(reply) => reply,
        Err(e) => {
            timer.finish("transport");
            return Err(ApiError::BadRequest(format!("failed to read request body: {e}")));
        }
    };
    timer.finish(reply.outcome());

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        reply.body,
    )
        .into_response())
}
