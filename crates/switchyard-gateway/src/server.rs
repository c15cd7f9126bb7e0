use crate::middleware::{access_log_middleware, auth_middleware};
use crate::reply::into_response;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header::HOST, HeaderMap, Method, StatusCode, Uri},
    middleware as axum_mw,
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use switchyard_core::{ServeMode, SwitchyardError, SwitchyardResult};
use switchyard_mcp::{HttpReply, InboundRequest, ProxyRegistry};
use tracing::error;

/// Shared application state.
pub struct GatewayState {
    pub registry: Arc<ProxyRegistry>,
    pub serve_mode: ServeMode,
}

/// The HTTP front of the proxy.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the router for `registry`.
    ///
    /// Every downstream `{name}` gets `GET /{name}/sse`,
    /// `POST /{name}/message` and `ANY /{name}`. When the proxy serves SSE,
    /// `/{name}` maps `GET` to the event stream and `POST` to message
    /// submission.
    pub fn build(registry: Arc<ProxyRegistry>, serve_mode: ServeMode) -> Router {
        let state = Arc::new(GatewayState {
            registry,
            serve_mode,
        });

        Router::new()
            .route("/", get(health_handler))
            .route("/{name}/sse", get(sse_handler))
            .route("/{name}/message", post(message_handler))
            .route("/{name}", any(streamable_handler))
            .layer(axum_mw::from_fn_with_state(state.clone(), auth_middleware))
            .layer(axum_mw::from_fn_with_state(
                state.clone(),
                access_log_middleware,
            ))
            .with_state(state)
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn sse_handler(
    State(state): State<Arc<GatewayState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    open_sse(&state, &name, &headers)
}

async fn message_handler(
    State(state): State<Arc<GatewayState>>,
    Path(name): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = InboundRequest::new(method, uri, headers, body);
    render(&name, state.registry.handle_post_message(&name, request).await)
}

async fn streamable_handler(
    State(state): State<Arc<GatewayState>>,
    Path(name): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if state.serve_mode == ServeMode::Sse {
        return match method {
            Method::GET => open_sse(&state, &name, &headers),
            Method::POST => {
                let request = InboundRequest::new(method, uri, headers, body);
                render(&name, state.registry.handle_post_message(&name, request).await)
            }
            _ => StatusCode::NOT_FOUND.into_response(),
        };
    }
    let request = InboundRequest::new(method, uri, headers, body);
    render(&name, state.registry.handle_streamable(&name, request).await)
}

fn open_sse(state: &GatewayState, name: &str, headers: &HeaderMap) -> Response {
    let endpoint = message_endpoint(headers, name);
    match state.registry.handle_sse(name, &endpoint) {
        Ok(stream) => into_response(HttpReply::stream(stream)),
        Err(e) => error_response(name, &e),
    }
}

/// Absolute message URL for an SSE session, built from the scheme and host
/// the caller used to reach the proxy.
fn message_endpoint(headers: &HeaderMap, name: &str) -> String {
    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    format!("{scheme}://{host}/{name}/message")
}

fn render(name: &str, outcome: SwitchyardResult<HttpReply>) -> Response {
    match outcome {
        Ok(reply) => into_response(reply),
        Err(e) => error_response(name, &e),
    }
}

fn error_response(name: &str, err: &SwitchyardError) -> Response {
    if err.is_not_found() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "MCP server not found"})),
        )
            .into_response();
    }
    error!(server = %name, error = %err, "Request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Internal server error"})),
    )
        .into_response()
}
