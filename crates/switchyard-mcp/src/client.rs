//! MCP client: JSON-RPC 2.0 request/response correlation over any
//! [`Transport`].

use crate::protocol::*;
use crate::transport::Transport;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::{SwitchyardError, SwitchyardResult};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long the transport connect and `initialize` exchange may take before
/// the downstream is considered unreachable.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>>;

/// RPC client bound to one downstream transport.
///
/// Requests carry monotonically increasing numeric ids; a reader task routes
/// every response to the caller waiting on that id. Responses nobody waits
/// for any more (an abandoned listing, for example) are dropped.
pub struct McpClient {
    name: String,
    transport: Arc<dyn Transport>,
    pending: PendingMap,
    next_id: AtomicU64,
    reader: Mutex<Option<JoinHandle<()>>>,
    server_info: Mutex<Option<InitializeResult>>,
    handshake_timeout: Duration,
}

impl McpClient {
    /// Client for `transport`. Nothing is sent until [`McpClient::connect`].
    pub fn new(name: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            name: name.into(),
            transport,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            reader: Mutex::new(None),
            server_info: Mutex::new(None),
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }

    /// Override [`HANDSHAKE_TIMEOUT`].
    pub fn with_handshake_timeout(mut self, limit: Duration) -> Self {
        self.handshake_timeout = limit;
        self
    }

    /// Open the transport and perform the MCP handshake: `initialize`, then
    /// `notifications/initialized`. A downstream that does not complete it
    /// within the handshake timeout fails with [`SwitchyardError::Handshake`].
    pub async fn connect(&self) -> SwitchyardResult<InitializeResult> {
        let limit = self.handshake_timeout;
        let result = tokio::time::timeout(limit, self.handshake())
            .await
            .map_err(|_| {
                SwitchyardError::Handshake(format!(
                    "<{}> no initialize response within {}s",
                    self.name,
                    limit.as_secs()
                ))
            })??;

        info!(
            server = %self.name,
            version = %result.protocol_version,
            "MCP server initialized"
        );
        *self.server_info.lock() = Some(result.clone());
        Ok(result)
    }

    async fn handshake(&self) -> SwitchyardResult<InitializeResult> {
        let inbound = self.transport.connect().await?;
        let handle = tokio::spawn(Self::read_loop(
            self.name.clone(),
            inbound,
            self.pending.clone(),
            self.transport.clone(),
        ));
        *self.reader.lock() = Some(handle);

        let result = self.initialize().await.map_err(|e| match e {
            SwitchyardError::Handshake(_) => e,
            other => SwitchyardError::Handshake(format!("initialize failed: {other}")),
        })?;
        self.notify("notifications/initialized", None).await?;
        Ok(result)
    }

    async fn read_loop(
        name: String,
        mut inbound: mpsc::UnboundedReceiver<JsonRpcMessage>,
        pending: PendingMap,
        transport: Arc<dyn Transport>,
    ) {
        while let Some(message) = inbound.recv().await {
            match message {
                JsonRpcMessage::Response(resp) => {
                    let waiter = pending.lock().remove(&resp.id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(resp);
                        }
                        None => debug!(server = %name, id = %resp.id, "Dropping unmatched response"),
                    }
                }
                JsonRpcMessage::Request(req) => {
                    let reply = if req.method == "ping" {
                        JsonRpcResponse::success(req.id, json!({}))
                    } else {
                        JsonRpcResponse::failure(
                            req.id,
                            JsonRpcError::new(
                                error_codes::METHOD_NOT_FOUND,
                                format!("Method not found: {}", req.method),
                            ),
                        )
                    };
                    if let Err(e) = transport.send(&JsonRpcMessage::from(reply)).await {
                        warn!(server = %name, error = %e, "Failed to answer downstream request");
                    }
                }
                JsonRpcMessage::Notification(note) => {
                    debug!(server = %name, method = %note.method, "Downstream notification");
                }
            }
        }
        debug!(server = %name, "Downstream message stream ended");
        // Wake every waiter with a closed-channel error.
        pending.lock().clear();
    }

    /// Send a request and wait for its response. Only the handshake is
    /// bounded; callers that need a limit on other requests wrap the future.
    pub async fn request(&self, method: &str, params: Option<Value>) -> SwitchyardResult<Value> {
        let id = RequestId::from(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);

        let _guard = PendingGuard {
            pending: &self.pending,
            id: id.clone(),
        };
        let req = JsonRpcRequest::new(id, method, params);
        self.transport.send(&JsonRpcMessage::from(req)).await?;

        let resp = rx.await.map_err(|_| {
            SwitchyardError::Transport(format!("Connection closed while waiting for '{method}'"))
        })?;
        resp.into_result()
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> SwitchyardResult<()> {
        let note = JsonRpcNotification::new(method, params);
        self.transport.send(&JsonRpcMessage::from(note)).await
    }

    async fn initialize(&self) -> SwitchyardResult<InitializeResult> {
        let params = json!({
            "protocolVersion": LATEST_PROTOCOL_VERSION,
            "capabilities": {
                "experimental": {},
                "roots": {"listChanged": false}
            },
            "clientInfo": {
                "name": "switchyard",
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        let result = self.request("initialize", Some(params)).await?;
        serde_json::from_value(result)
            .map_err(|e| SwitchyardError::Handshake(format!("Failed to parse initialize result: {e}")))
    }

    /// Liveness check.
    pub async fn ping(&self) -> SwitchyardResult<()> {
        self.request("ping", None).await.map(|_| ())
    }

    async fn list_paginated<T: DeserializeOwned>(
        &self,
        method: &str,
        key: &str,
    ) -> SwitchyardResult<Vec<T>> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let mut page = self.request(method, params).await?;
            if let Some(list) = page.get_mut(key).map(Value::take) {
                let parsed: Vec<T> = serde_json::from_value(list)?;
                items.extend(parsed);
            }
            cursor = page
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(String::from);
            if cursor.is_none() {
                return Ok(items);
            }
        }
    }

    /// Every tool, following pagination cursors.
    pub async fn list_tools(&self) -> SwitchyardResult<Vec<ToolDef>> {
        self.list_paginated("tools/list", "tools").await
    }

    /// Every prompt, following pagination cursors.
    pub async fn list_prompts(&self) -> SwitchyardResult<Vec<PromptDef>> {
        self.list_paginated("prompts/list", "prompts").await
    }

    /// Every resource, following pagination cursors.
    pub async fn list_resources(&self) -> SwitchyardResult<Vec<ResourceDef>> {
        self.list_paginated("resources/list", "resources").await
    }

    /// `tools/call`.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> SwitchyardResult<Value> {
        let mut params = json!({ "name": name });
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        self.request("tools/call", Some(params)).await
    }

    /// `prompts/get`.
    pub async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> SwitchyardResult<Value> {
        let mut params = json!({ "name": name });
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        self.request("prompts/get", Some(params)).await
    }

    /// `resources/read`.
    pub async fn read_resource(&self, uri: &str) -> SwitchyardResult<Value> {
        self.request("resources/read", Some(json!({ "uri": uri }))).await
    }

    /// The downstream's `initialize` answer, once connected.
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server_info.lock().clone()
    }

    /// Downstream name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the reader and fail every outstanding request. The transport is
    /// closed separately by its owner.
    pub async fn close(&self) -> SwitchyardResult<()> {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        self.pending.lock().clear();
        Ok(())
    }
}

/// Removes an abandoned request from the pending map when its caller stops
/// waiting (for example when a listing timeout drops the future).
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}
