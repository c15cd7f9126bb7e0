#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for the proxy registry and its inbound sessions.

mod common;

use bytes::Bytes;
use common::{stdio_config, FakeConnector, FakeDownstream};
use futures_util::StreamExt;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::{ActiveGroup, Config, DownstreamConfig, SwitchyardError};
use switchyard_mcp::session::SessionTransport;
use switchyard_mcp::{ConnectionDeps, InboundRequest, ProxyRegistry, ReplyBody, StartupMode};
use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config_with(servers: &[(&str, DownstreamConfig)]) -> Config {
    let mut config = Config::from_json_str(r#"{"mcpProxy": {"version": "9.9.9"}}"#).unwrap();
    config.mcp_servers = servers
        .iter()
        .map(|(name, cfg)| (name.to_string(), cfg.clone()))
        .collect::<BTreeMap<_, _>>();
    config
}

async fn registry(servers: &[(&str, DownstreamConfig)], connector: FakeConnector) -> ProxyRegistry {
    ProxyRegistry::start(
        &config_with(servers),
        &ActiveGroup::all(),
        ConnectionDeps::new(Arc::new(connector)),
        StartupMode::Http,
    )
    .await
    .unwrap()
}

fn streamable_post(body: Value, session: Option<&str>) -> InboundRequest {
    let mut headers = HeaderMap::new();
    headers.insert(
        http::header::ACCEPT,
        HeaderValue::from_static("application/json, text/event-stream"),
    );
    headers.insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    if let Some(id) = session {
        headers.insert("mcp-session-id", HeaderValue::from_str(id).unwrap());
    }
    InboundRequest::new(
        Method::POST,
        "/github".parse().unwrap(),
        headers,
        Bytes::from(body.to_string()),
    )
}

async fn first_message(body: ReplyBody) -> Value {
    let ReplyBody::EventStream(mut stream) = body else {
        panic!("expected an event stream");
    };
    let event = stream.next().await.unwrap();
    serde_json::from_str(&event.data).unwrap()
}

fn initialize() -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": {"name": "test", "version": "0"}
        }
    })
}

// ---------------------------------------------------------------------------
// Startup and lookup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_failed_downstream_is_skipped() {
    let connector = FakeConnector::new().with("github", FakeDownstream::new(&["a"]).into_arc());
    let registry = registry(&[("github", stdio_config()), ("broken", stdio_config())], connector).await;

    assert_eq!(registry.names(), vec!["github"]);
    let err = registry.handle_sse("broken", "/broken/message").unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_downstream_does_not_block_startup() {
    let connector = FakeConnector::new()
        .with("good", FakeDownstream::new(&["a"]).into_arc())
        .with("hung", FakeDownstream::new(&["b"]).silent_on("initialize").into_arc());
    let started = tokio::time::timeout(
        Duration::from_secs(3600),
        registry(&[("good", stdio_config()), ("hung", stdio_config())], connector),
    )
    .await
    .expect("startup should finish once the handshake times out");

    assert_eq!(started.names(), vec!["good"]);
    let err = started.handle_sse("hung", "/hung/message").unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_strict_downstream_aborts_startup() {
    let mut strict = stdio_config();
    strict.options.panic_if_invalid = Some(true);
    let connector = FakeConnector::new()
        .with("hung", FakeDownstream::new(&["b"]).silent_on("initialize").into_arc());
    let result = ProxyRegistry::start(
        &config_with(&[("hung", strict)]),
        &ActiveGroup::all(),
        ConnectionDeps::new(Arc::new(connector)),
        StartupMode::Http,
    )
    .await;
    let Err(err) = result else {
        panic!("startup should fail");
    };
    assert!(matches!(err.root(), SwitchyardError::Handshake(_)));
}

#[tokio::test]
async fn test_panic_if_invalid_aborts_startup() {
    let mut strict = stdio_config();
    strict.options.panic_if_invalid = Some(true);
    let result = ProxyRegistry::start(
        &config_with(&[("broken", strict)]),
        &ActiveGroup::all(),
        ConnectionDeps::new(Arc::new(FakeConnector::new())),
        StartupMode::Http,
    )
    .await;
    assert!(matches!(result, Err(SwitchyardError::Initialization(_))));
}

#[tokio::test]
async fn test_unknown_stdio_target_is_config_error() {
    let result = ProxyRegistry::start(
        &config_with(&[("github", stdio_config())]),
        &ActiveGroup::all(),
        ConnectionDeps::new(Arc::new(FakeConnector::new())),
        StartupMode::Stdio {
            target: "gitlab".into(),
        },
    )
    .await;
    assert!(matches!(result, Err(SwitchyardError::Config(_))));
}

// ---------------------------------------------------------------------------
// SSE sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sse_session_lifecycle() {
    let connector = FakeConnector::new().with("github", FakeDownstream::new(&["a"]).into_arc());
    let registry = registry(&[("github", stdio_config())], connector).await;
    let managed = registry.get("github").unwrap();

    let mut stream = registry
        .handle_sse("github", "http://localhost:8083/github/message")
        .unwrap();
    let endpoint = stream.next().await.unwrap();
    assert_eq!(endpoint.event.as_deref(), Some("endpoint"));
    let session_id = endpoint.data.split("sessionId=").nth(1).unwrap().to_string();
    assert!(managed.sessions().contains(&session_id));

    let post = InboundRequest::new(
        Method::POST,
        format!("/github/message?sessionId={session_id}").parse().unwrap(),
        HeaderMap::new(),
        Bytes::from(json!({"jsonrpc": "2.0", "id": 5, "method": "tools/list"}).to_string()),
    );
    let reply = registry.handle_post_message("github", post).await.unwrap();
    assert_eq!(reply.status, StatusCode::ACCEPTED);

    let message = stream.next().await.unwrap();
    let response: Value = serde_json::from_str(&message.data).unwrap();
    assert_eq!(response["id"], 5);
    assert_eq!(response["result"]["tools"][0]["name"], "a");

    let Some(SessionTransport::Sse(transport)) = managed.sessions().get(&session_id) else {
        panic!("expected an SSE session");
    };
    drop(stream);
    while managed.sessions().contains(&session_id) {
        tokio::task::yield_now().await;
    }
    while !transport.is_closed() {
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// Streamable HTTP sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_streamable_session_registered_and_reused() {
    let connector = FakeConnector::new().with("github", FakeDownstream::new(&["a"]).into_arc());
    let registry = registry(&[("github", stdio_config())], connector).await;
    let managed = registry.get("github").unwrap();

    let reply = registry
        .handle_streamable("github", streamable_post(initialize(), None))
        .await
        .unwrap();
    assert_eq!(reply.status, StatusCode::OK);
    let session_id = reply.headers["mcp-session-id"].to_str().unwrap().to_string();
    assert!(managed.sessions().contains(&session_id));

    let init = first_message(reply.body).await;
    assert_eq!(init["result"]["serverInfo"], json!({"name": "github", "version": "9.9.9"}));

    let reply = registry
        .handle_streamable(
            "github",
            streamable_post(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}), Some(&session_id)),
        )
        .await
        .unwrap();
    let listed = first_message(reply.body).await;
    assert_eq!(listed["result"]["tools"][0]["name"], "a");
    assert_eq!(managed.sessions().len(), 1);

    let delete = InboundRequest::new(
        Method::DELETE,
        "/github".parse().unwrap(),
        {
            let mut headers = HeaderMap::new();
            headers.insert("mcp-session-id", HeaderValue::from_str(&session_id).unwrap());
            headers
        },
        Bytes::new(),
    );
    let reply = registry.handle_streamable("github", delete).await.unwrap();
    assert_eq!(reply.status, StatusCode::OK);
    while managed.sessions().contains(&session_id) {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_streamable_request_without_session_is_rejected() {
    let connector = FakeConnector::new().with("github", FakeDownstream::new(&["a"]).into_arc());
    let registry = registry(&[("github", stdio_config())], connector).await;

    let reply = registry
        .handle_streamable(
            "github",
            streamable_post(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}), None),
        )
        .await
        .unwrap();
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(registry.get("github").unwrap().sessions().is_empty());
}

#[tokio::test]
async fn test_post_message_without_sse_session_falls_back_to_streamable() {
    let connector = FakeConnector::new().with("github", FakeDownstream::new(&["a"]).into_arc());
    let registry = registry(&[("github", stdio_config())], connector).await;

    let reply = registry
        .handle_post_message("github", streamable_post(initialize(), None))
        .await
        .unwrap();
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.headers.contains_key("mcp-session-id"));
}

#[tokio::test]
async fn test_shutdown_closes_everything() {
    let downstream = FakeDownstream::new(&["a"]).into_arc();
    let connector = FakeConnector::new().with("github", downstream);
    let registry = registry(&[("github", stdio_config())], connector).await;
    let managed = registry.get("github").unwrap();

    let _stream = registry.handle_sse("github", "/github/message").unwrap();
    assert_eq!(managed.sessions().len(), 1);

    registry.shutdown().await;
    assert!(registry.names().is_empty());
    assert!(managed.sessions().is_empty());
    assert!(matches!(
        managed.connection().state(),
        switchyard_mcp::ConnectionState::Closed
    ));
}

// ---------------------------------------------------------------------------
// Stdio
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_stdio_mode_serves_target() {
    let connector = FakeConnector::new().with("github", FakeDownstream::new(&["a", "b"]).into_arc());
    let registry = Arc::new(
        ProxyRegistry::start(
            &config_with(&[("github", stdio_config()), ("other", stdio_config())]),
            &ActiveGroup::all(),
            ConnectionDeps::new(Arc::new(connector)),
            StartupMode::Stdio {
                target: "github".into(),
            },
        )
        .await
        .unwrap(),
    );
    assert_eq!(registry.names(), vec!["github"]);

    let (mut client_in, server_in) = duplex(4096);
    let (server_out, client_out) = duplex(4096);
    let serving = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.serve_stdio(server_in, server_out).await })
    };

    // Deferred startup: wait for the handshake before listing.
    let conn = registry.get("github").unwrap().connection().clone();
    conn.ensure_initialized().await.unwrap();

    client_in
        .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/list\"}\n")
        .await
        .unwrap();
    let mut lines = BufReader::new(client_out).lines();
    let line = lines.next_line().await.unwrap().unwrap();
    let response: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(response["result"]["tools"].as_array().unwrap().len(), 2);

    drop(client_in);
    serving.await.unwrap().unwrap();
}
