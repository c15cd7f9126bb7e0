use crate::server::GatewayState;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use switchyard_security::verify_bearer;
use tracing::{info, warn};

/// Downstream addressed by a proxied path: its first segment.
pub(crate) fn server_name(path: &str) -> Option<&str> {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .filter(|s| !s.is_empty())
}

/// Bearer-token check against the addressed downstream's `authTokens`.
///
/// Requests for unknown downstreams pass through so the handler can answer
/// 404. Downstreams without tokens accept everything.
pub async fn auth_middleware(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some((name, managed)) = server_name(request.uri().path())
        .and_then(|name| state.registry.get(name).map(|m| (name.to_string(), m)))
    else {
        return next.run(request).await;
    };

    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let outcome = verify_bearer(header, managed.connection().config().options.auth_tokens());
    match outcome {
        Ok(()) => next.run(request).await,
        Err(e) => {
            warn!(server = %name, error = %e, "Rejected request");
            (StatusCode::UNAUTHORIZED, Json(json!({"error": "Unauthorized"}))).into_response()
        }
    }
}

/// Per-request access log for downstreams with `logEnabled`.
pub async fn access_log_middleware(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    let name = server_name(request.uri().path()).map(String::from);
    let enabled = name
        .as_deref()
        .and_then(|n| state.registry.get(n))
        .is_some_and(|m| m.connection().config().options.log_enabled());
    if !enabled {
        return next.run(request).await;
    }

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let session_id = request
        .headers()
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let started = Instant::now();
    let response = next.run(request).await;
    info!(
        server = name.as_deref().unwrap_or_default(),
        method = %method,
        path = %path,
        session_id = ?session_id,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request"
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_name_is_first_segment() {
        assert_eq!(server_name("/github/sse"), Some("github"));
        assert_eq!(server_name("/github"), Some("github"));
        assert_eq!(server_name("/"), None);
        assert_eq!(server_name(""), None);
    }
}
