//! The virtual MCP server a caller talks to.
//!
//! One [`VirtualServer`] exists per downstream connection. It answers the
//! MCP method surface by delegating to the connection, and can be bound to
//! any number of inbound sessions at once.

use crate::connection::DownstreamConnection;
use crate::protocol::*;
use crate::session::ServerTransport;
use serde_json::{json, Value};
use std::sync::Arc;
use switchyard_core::{SwitchyardError, SwitchyardResult};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct VirtualServer {
    connection: Arc<DownstreamConnection>,
    version: String,
}

impl VirtualServer {
    pub fn new(connection: Arc<DownstreamConnection>, version: impl Into<String>) -> Self {
        Self {
            connection,
            version: version.into(),
        }
    }

    pub fn connection(&self) -> &Arc<DownstreamConnection> {
        &self.connection
    }

    /// Answer one request. Failures become JSON-RPC error responses.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        match self.dispatch(&request).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => {
                debug!(
                    server = %self.connection.name(),
                    method = %request.method,
                    error = %e,
                    "Request failed"
                );
                JsonRpcResponse::failure(id, JsonRpcError::from(&e))
            }
        }
    }

    async fn dispatch(&self, request: &JsonRpcRequest) -> SwitchyardResult<Value> {
        let conn = &self.connection;
        match request.method.as_str() {
            "initialize" => Ok(self.initialize_result(request)),
            "ping" => Ok(json!({})),
            "tools/list" => {
                let tools = conn.list_tools().await?;
                Ok(json!({ "tools": tools }))
            }
            "tools/call" => {
                let name = required_str(request, "name")?;
                let tools = conn.list_tools().await?;
                if !tools.iter().any(|t| t.name == name) {
                    return Err(SwitchyardError::NotFound(format!("Tool {name}")));
                }
                conn.call_tool(name, argument_object(request)).await
            }
            "prompts/list" => {
                let prompts = conn.list_prompts().await?;
                Ok(json!({ "prompts": prompts }))
            }
            "prompts/get" => {
                let name = required_str(request, "name")?;
                let prompts = conn.list_prompts().await?;
                if !prompts.iter().any(|p| p.name == name) {
                    return Err(SwitchyardError::NotFound(format!("Prompt {name}")));
                }
                conn.get_prompt(name, argument_object(request)).await
            }
            "resources/list" => {
                let resources = conn.list_resources().await?;
                Ok(json!({ "resources": resources }))
            }
            "resources/read" => {
                let uri = required_str(request, "uri")?;
                conn.read_resource(uri).await
            }
            other => Err(SwitchyardError::Rpc {
                code: error_codes::METHOD_NOT_FOUND,
                message: format!("Method not found: {other}"),
                data: None,
            }),
        }
    }

    fn initialize_result(&self, request: &JsonRpcRequest) -> Value {
        let requested = request.param_str("protocolVersion");
        let version = requested
            .filter(|v| SUPPORTED_PROTOCOL_VERSIONS.contains(v))
            .unwrap_or(LATEST_PROTOCOL_VERSION);
        json!({
            "protocolVersion": version,
            "capabilities": {
                "tools": {},
                "prompts": {},
                "resources": {}
            },
            "serverInfo": {
                "name": self.connection.name(),
                "version": self.version
            }
        })
    }

    /// Serve one inbound session: every request received on `inbound` is
    /// handled on its own task and answered through `transport`. The task
    /// ends when the session's inbound channel closes.
    pub fn serve(
        self: &Arc<Self>,
        transport: Arc<dyn ServerTransport>,
        mut inbound: mpsc::UnboundedReceiver<JsonRpcMessage>,
    ) -> JoinHandle<()> {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                match message {
                    JsonRpcMessage::Request(request) => {
                        let server = server.clone();
                        let transport = transport.clone();
                        tokio::spawn(async move {
                            let response = server.handle_request(request).await;
                            if let Err(e) = transport.send(JsonRpcMessage::Response(response)).await {
                                warn!(
                                    server = %server.connection.name(),
                                    error = %e,
                                    "Failed to deliver response"
                                );
                            }
                        });
                    }
                    JsonRpcMessage::Notification(note) => {
                        debug!(server = %server.connection.name(), method = %note.method, "Client notification");
                    }
                    JsonRpcMessage::Response(resp) => {
                        debug!(server = %server.connection.name(), id = %resp.id, "Ignoring client response");
                    }
                }
            }
            debug!(server = %server.connection.name(), "Session ended");
        })
    }
}

fn required_str<'a>(request: &'a JsonRpcRequest, key: &str) -> SwitchyardResult<&'a str> {
    request.param_str(key).ok_or_else(|| SwitchyardError::Rpc {
        code: error_codes::INVALID_PARAMS,
        message: format!("Missing required parameter '{key}'"),
        data: None,
    })
}

fn argument_object(request: &JsonRpcRequest) -> Option<Value> {
    request
        .params
        .as_ref()
        .and_then(|p| p.get("arguments"))
        .filter(|a| !a.is_null())
        .cloned()
}
