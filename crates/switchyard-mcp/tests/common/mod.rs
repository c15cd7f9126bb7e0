//! In-memory downstreams shared by the integration suites.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::{DownstreamConfig, SwitchyardError, SwitchyardResult, TransportKind};
use switchyard_mcp::protocol::{
    error_codes, JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse,
};
use switchyard_mcp::{Transport, TransportConnector};
use tokio::sync::mpsc;

/// A scripted downstream MCP server.
pub struct FakeDownstream {
    kind: TransportKind,
    tools: Vec<String>,
    prompts_supported: bool,
    silent: HashSet<String>,
    delayed: HashMap<String, Duration>,
    tx: Mutex<Option<mpsc::UnboundedSender<JsonRpcMessage>>>,
    requests: Mutex<Vec<String>>,
}

impl FakeDownstream {
    pub fn new(tools: &[&str]) -> Self {
        Self {
            kind: TransportKind::Stdio,
            tools: tools.iter().map(|t| t.to_string()).collect(),
            prompts_supported: true,
            silent: HashSet::new(),
            delayed: HashMap::new(),
            tx: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_kind(mut self, kind: TransportKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn without_prompts(mut self) -> Self {
        self.prompts_supported = false;
        self
    }

    /// Never answer `method`.
    pub fn silent_on(mut self, method: &str) -> Self {
        self.silent.insert(method.to_string());
        self
    }

    /// Answer `method` only after `delay`.
    pub fn delayed_on(mut self, method: &str, delay: Duration) -> Self {
        self.delayed.insert(method.to_string(), delay);
        self
    }

    /// Whether the proxy currently holds the transport open.
    pub fn is_connected(&self) -> bool {
        self.tx.lock().is_some()
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Number of requests received for `method`.
    pub fn count(&self, method: &str) -> usize {
        self.requests.lock().iter().filter(|m| *m == method).count()
    }

    fn answer(&self, request: &JsonRpcRequest) -> Option<JsonRpcResponse> {
        if self.silent.contains(&request.method) {
            return None;
        }
        let id = request.id.clone();
        let result = match request.method.as_str() {
            "initialize" => json!({
                "protocolVersion": "2025-03-26",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "fake", "version": "0.1.0"}
            }),
            "ping" => json!({}),
            "tools/list" => {
                let tools: Vec<Value> = self
                    .tools
                    .iter()
                    .map(|name| json!({"name": name, "inputSchema": {"type": "object"}}))
                    .collect();
                json!({ "tools": tools })
            }
            "tools/call" => {
                let name = request.param_str("name").unwrap_or_default();
                json!({
                    "content": [{
                        "type": "text",
                        "text": format!("{name}: ask Alice at alice@example.com")
                    }]
                })
            }
            "prompts/list" if self.prompts_supported => {
                json!({"prompts": [{"name": "greet", "description": "Say hello"}]})
            }
            "prompts/get" if self.prompts_supported => {
                json!({"messages": [{"role": "user", "content": {"type": "text", "text": "hello"}}]})
            }
            "resources/list" => json!({"resources": [{"uri": "file:///readme", "name": "readme"}]}),
            "resources/read" => json!({"contents": [{"uri": "file:///readme", "text": "read me"}]}),
            _ => {
                return Some(JsonRpcResponse::failure(
                    id,
                    JsonRpcError::new(error_codes::METHOD_NOT_FOUND, "Method not found"),
                ))
            }
        };
        Some(JsonRpcResponse::success(id, result))
    }
}

#[async_trait]
impl Transport for FakeDownstream {
    fn kind(&self) -> TransportKind {
        self.kind
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
        self.requests.lock().push(request.method.clone());
        let Some(response) = self.answer(request) else {
            return Ok(());
        };
        let Some(tx) = self.tx.lock().clone() else {
            return Ok(());
        };
        match self.delayed.get(&request.method) {
            Some(delay) => {
                let delay = *delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(JsonRpcMessage::Response(response));
                });
            }
            None => {
                let _ = tx.send(JsonRpcMessage::Response(response));
            }
        }
        Ok(())
    }

    async fn close(&self) -> SwitchyardResult<()> {
        self.tx.lock().take();
        Ok(())
    }
}

/// Hands out fake downstreams by name.
#[derive(Default)]
pub struct FakeConnector {
    downstreams: HashMap<String, Arc<FakeDownstream>>,
    builds: AtomicUsize,
    failures_left: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, downstream: Arc<FakeDownstream>) -> Self {
        self.downstreams.insert(name.to_string(), downstream);
        self
    }

    /// Fail the next `n` builds.
    pub fn failing(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl TransportConnector for FakeConnector {
    fn build(&self, name: &str, _config: &DownstreamConfig) -> SwitchyardResult<Arc<dyn Transport>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(SwitchyardError::Handshake(format!("{name}: connection refused")));
        }
        self.downstreams
            .get(name)
            .cloned()
            .map(|d| d as Arc<dyn Transport>)
            .ok_or_else(|| SwitchyardError::Handshake(format!("{name}: no such downstream")))
    }
}

/// Stdio-shaped downstream config with the given options applied.
pub fn stdio_config() -> DownstreamConfig {
    DownstreamConfig {
        command: Some("fake-mcp".into()),
        ..Default::default()
    }
}
