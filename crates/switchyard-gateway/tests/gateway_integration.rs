#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use switchyard_core::{
    ActiveGroup, Config, DownstreamConfig, ServeMode, SwitchyardResult, TransportKind,
};
use switchyard_gateway::GatewayServer;
use switchyard_mcp::protocol::{JsonRpcMessage, JsonRpcResponse};
use switchyard_mcp::{ConnectionDeps, ProxyRegistry, StartupMode, Transport, TransportConnector};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Downstream exposing a single `echo` tool.
#[derive(Default)]
struct EchoDownstream {
    tx: Mutex<Option<mpsc::UnboundedSender<JsonRpcMessage>>>,
}

#[async_trait]
impl Transport for EchoDownstream {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn connect(&self) -> SwitchyardResult<mpsc::UnboundedReceiver<JsonRpcMessage>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.tx.lock() = Some(tx);
        Ok(rx)
    }

    async fn send(&self, message: &JsonRpcMessage) -> SwitchyardResult<()> {
        let JsonRpcMessage::Request(request) = message else {
            return Ok(());
        };
        let result = match request.method.as_str() {
            "initialize" => json!({
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "serverInfo": {"name": "echo", "version": "1"}
            }),
            "tools/list" => json!({"tools": [{"name": "echo"}]}),
            "tools/call" => json!({"content": [{"type": "text", "text": "pong"}]}),
            _ => json!({}),
        };
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(JsonRpcResponse::success(request.id.clone(), result).into());
        }
        Ok(())
    }

    async fn close(&self) -> SwitchyardResult<()> {
        self.tx.lock().take();
        Ok(())
    }
}

struct EchoConnector;

impl TransportConnector for EchoConnector {
    fn build(&self, _name: &str, _config: &DownstreamConfig) -> SwitchyardResult<Arc<dyn Transport>> {
        Ok(Arc::new(EchoDownstream::default()))
    }
}

/// Start the gateway on an ephemeral port with downstreams `open` (no auth)
/// and `locked` (token `s3cret`).
async fn start_gateway(mode: ServeMode) -> (String, Arc<ProxyRegistry>) {
    let config = Config::from_json_str(
        r#"{
            "mcpProxy": {"version": "1.2.3", "options": {"logEnabled": true}},
            "mcpServers": {
                "open": {"command": "echo"},
                "locked": {"command": "echo", "options": {"authTokens": ["s3cret"]}}
            }
        }"#,
    )
    .unwrap();
    let registry = Arc::new(
        ProxyRegistry::start(
            &config,
            &ActiveGroup::all(),
            ConnectionDeps::new(Arc::new(EchoConnector)),
            StartupMode::Http,
        )
        .await
        .unwrap(),
    );
    let app = GatewayServer::build(registry.clone(), mode);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://127.0.0.1:{}", addr.port()), registry)
}

fn rpc(id: u64, method: &str, params: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
}

/// First `message` event of a streamable HTTP reply.
async fn first_message(response: reqwest::Response) -> Value {
    let mut events = response.bytes_stream().eventsource();
    loop {
        let event = events.next().await.unwrap().unwrap();
        if event.event == "message" {
            return serde_json::from_str(&event.data).unwrap();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health_needs_no_auth() {
    let (base, _) = start_gateway(ServeMode::StreamableHttp).await;
    let body: Value = reqwest::get(&base).await.unwrap().json().await.unwrap();
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_bearer_auth_is_per_downstream() {
    let (base, _) = start_gateway(ServeMode::StreamableHttp).await;
    let http = reqwest::Client::new();

    let denied = http
        .post(format!("{base}/locked"))
        .json(&rpc(1, "initialize", json!({})))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 401);

    let wrong = http
        .post(format!("{base}/locked"))
        .bearer_auth("nope")
        .json(&rpc(1, "initialize", json!({})))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);

    let allowed = http
        .post(format!("{base}/locked"))
        .bearer_auth("s3cret")
        .header("accept", "application/json, text/event-stream")
        .json(&rpc(1, "initialize", json!({})))
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), 200);
}

#[tokio::test]
async fn test_streamable_http_session() {
    let (base, registry) = start_gateway(ServeMode::StreamableHttp).await;
    let http = reqwest::Client::new();

    let init = http
        .post(format!("{base}/open"))
        .header("accept", "application/json, text/event-stream")
        .json(&rpc(1, "initialize", json!({"protocolVersion": "2025-03-26"})))
        .send()
        .await
        .unwrap();
    assert_eq!(init.status(), 200);
    let session_id = init.headers()["mcp-session-id"].to_str().unwrap().to_string();
    let init = first_message(init).await;
    assert_eq!(init["result"]["serverInfo"]["name"], "open");
    assert_eq!(init["result"]["serverInfo"]["version"], "1.2.3");

    let call = http
        .post(format!("{base}/open"))
        .header("accept", "application/json, text/event-stream")
        .header("mcp-session-id", &session_id)
        .json(&rpc(2, "tools/call", json!({"name": "echo", "arguments": {}})))
        .send()
        .await
        .unwrap();
    let call = first_message(call).await;
    assert_eq!(call["result"]["content"][0]["text"], "pong");

    let deleted = http
        .delete(format!("{base}/open"))
        .header("mcp-session-id", &session_id)
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 200);
    let sessions_gone = || !registry.get("open").unwrap().sessions().contains(&session_id);
    while !sessions_gone() {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_sse_session_over_http() {
    let (base, _) = start_gateway(ServeMode::Sse).await;
    let http = reqwest::Client::new();

    let stream = http.get(format!("{base}/open/sse")).send().await.unwrap();
    assert_eq!(stream.status(), 200);
    let mut events = stream.bytes_stream().eventsource();

    let endpoint = events.next().await.unwrap().unwrap();
    assert_eq!(endpoint.event, "endpoint");
    assert!(endpoint.data.starts_with("http://127.0.0.1:"));
    assert!(endpoint.data.contains("/open/message?sessionId="));

    let posted = http
        .post(&endpoint.data)
        .json(&rpc(7, "tools/list", json!({})))
        .send()
        .await
        .unwrap();
    assert_eq!(posted.status(), 202);

    let message = events.next().await.unwrap().unwrap();
    assert_eq!(message.event, "message");
    let response: Value = serde_json::from_str(&message.data).unwrap();
    assert_eq!(response["id"], 7);
    assert_eq!(response["result"]["tools"][0]["name"], "echo");
}

#[tokio::test]
async fn test_sse_mode_maps_bare_path() {
    let (base, _) = start_gateway(ServeMode::Sse).await;
    let stream = reqwest::get(format!("{base}/open")).await.unwrap();
    assert_eq!(stream.status(), 200);
    let mut events = stream.bytes_stream().eventsource();
    let endpoint = events.next().await.unwrap().unwrap();
    assert_eq!(endpoint.event, "endpoint");
}
