//! Stateless Streamable HTTP transport.
//!
//! Every `POST` carries one JSON-RPC message and gets the reply in the
//! response body. No session is kept, so `GET` (server stream) and `DELETE`
//! (session teardown) are answered with 405.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::Value;
use std::sync::Arc;

use crate::protocol::{dispatch, Handler, McpServer};
use crate::types::error::ErrorData;
use crate::types::jsonrpc::{JsonRpcMessage, JsonRpcReply, RequestId};

/// Methods answered on the MCP path, for `Allow` headers.
pub const ALLOWED_METHODS: &str = "POST";

/// Routes for the MCP endpoint, rooted at `/`. Nest it wherever the
/// endpoint should live.
pub fn router<H: Handler>(server: Arc<McpServer<H>>) -> Router {
    Router::new()
        .route(
            "/",
            post(post_handler::<H>)
                .get(method_not_allowed)
                .delete(method_not_allowed),
        )
        .with_state(server)
}

#[tracing::instrument(name = "mcp.http.post", skip(server, body), fields(body.len = body.len()))]
async fn post_handler<H: Handler>(
    State(server): State<Arc<McpServer<H>>>,
    body: Bytes,
) -> Response {
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "request body is not JSON");
            let reply = JsonRpcReply::failure(None, ErrorData::parse_error(format!("Parse error: {}", e)));
            return (StatusCode::BAD_REQUEST, Json(reply)).into_response();
        }
    };

    let recovered_id = raw
        .get("id")
        .cloned()
        .and_then(|id| serde_json::from_value::<RequestId>(id).ok());

    let message: JsonRpcMessage = match serde_json::from_value(raw) {
        Ok(message) => message,
        Err(e) => {
            let reply = JsonRpcReply::failure(
                recovered_id,
                ErrorData::invalid_request(format!("Invalid JSON-RPC: {}", e)),
            );
            return (StatusCode::BAD_REQUEST, Json(reply)).into_response();
        }
    };

    match dispatch(&server, &message).await {
        Some(reply) => (StatusCode::OK, Json(reply)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn method_not_allowed() -> Response {
    let reply = JsonRpcReply::failure(None, ErrorData::new(-32000, "Method not allowed."));
    let mut response = (StatusCode::METHOD_NOT_ALLOWED, Json(reply)).into_response();
    response
        .headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    response
}
