//! MCP (Model Context Protocol) JSON-RPC 2.0 message types.
//!
//! Only the envelope and the handful of fields the proxy inspects are typed.
//! Everything else travels as raw JSON so that downstream payloads reach the
//! caller unchanged.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use switchyard_core::{SwitchyardError, METHOD_NOT_FOUND};

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision the proxy speaks by default.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-03-26";

/// Protocol revisions the proxy accepts from callers.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-03-26", "2024-11-05"];

/// Standard JSON-RPC error codes.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist.
    pub const METHOD_NOT_FOUND: i64 = super::METHOD_NOT_FOUND;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Request identifier: JSON-RPC allows numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => f.write_str(s),
        }
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        RequestId::Number(value as i64)
    }
}

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// String parameter `key`, if present.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.as_ref()?.get(key)?.as_str()
    }
}

/// JSON-RPC 2.0 notification (a request without an id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RequestId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Convert into the call outcome: the result value, or the error object
    /// as [`SwitchyardError::Rpc`].
    pub fn into_result(self) -> Result<Value, SwitchyardError> {
        match (self.error, self.result) {
            (Some(err), _) => Err(SwitchyardError::Rpc {
                code: err.code,
                message: err.message,
                data: err.data,
            }),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(Value::Object(Map::new())),
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl From<&SwitchyardError> for JsonRpcError {
    fn from(err: &SwitchyardError) -> Self {
        match err.root() {
            SwitchyardError::Rpc {
                code,
                message,
                data,
            } => Self {
                code: *code,
                message: message.clone(),
                data: data.clone(),
            },
            SwitchyardError::NotFound(what) => {
                Self::new(error_codes::INVALID_PARAMS, format!("{what} not found"))
            }
            other => Self::new(error_codes::INTERNAL_ERROR, other.to_string()),
        }
    }
}

/// Any JSON-RPC message, classified by the presence of `id` and `method`:
/// both is a request, `method` only is a notification, `id` only is a
/// response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
}

impl JsonRpcMessage {
    /// Classify an already parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let Value::Object(ref map) = value else {
            return Err(serde_json::Error::custom("JSON-RPC message must be an object"));
        };
        if map.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(serde_json::Error::custom("missing or invalid jsonrpc version"));
        }
        let has_id = map.get("id").is_some_and(|id| !id.is_null());
        let has_method = map.contains_key("method");
        match (has_id, has_method) {
            (true, true) => serde_json::from_value(value).map(JsonRpcMessage::Request),
            (false, true) => serde_json::from_value(value).map(JsonRpcMessage::Notification),
            (true, false) => serde_json::from_value(value).map(JsonRpcMessage::Response),
            (false, false) => Err(serde_json::Error::custom(
                "message has neither id nor method",
            )),
        }
    }

    /// Parse a body that holds either one message or a batch array.
    pub fn parse_batch(value: Value) -> Result<Vec<Self>, serde_json::Error> {
        match value {
            Value::Array(items) => items.into_iter().map(Self::from_value).collect(),
            single => Self::from_value(single).map(|m| vec![m]),
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            JsonRpcMessage::Request(r) => Some(&r.method),
            JsonRpcMessage::Notification(n) => Some(&n.method),
            JsonRpcMessage::Response(_) => None,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, JsonRpcMessage::Request(_))
    }
}

impl<'de> Deserialize<'de> for JsonRpcMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        JsonRpcMessage::from_value(value).map_err(D::Error::custom)
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(value: JsonRpcRequest) -> Self {
        JsonRpcMessage::Request(value)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(value: JsonRpcNotification) -> Self {
        JsonRpcMessage::Notification(value)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(value: JsonRpcResponse) -> Self {
        JsonRpcMessage::Response(value)
    }
}

/// Tool entry from `tools/list`. Fields other than `name` are carried as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Prompt entry from `prompts/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDef {
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Resource entry from `resources/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDef {
    pub uri: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Name and version of an MCP peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// MCP initialize response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default, rename = "serverInfo", skip_serializing_if = "Option::is_none")]
    pub server_info: Option<Implementation>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let req = JsonRpcRequest::new(1u64, "tools/list", None);
        let parsed = serde_json::to_value(&req).unwrap();
        assert_eq!(parsed, json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}));
    }

    #[test]
    fn test_classification() {
        let req: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"a","method":"ping"}"#).unwrap();
        assert!(matches!(req, JsonRpcMessage::Request(ref r) if r.id == RequestId::String("a".into())));

        let note: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
                .unwrap();
        assert!(matches!(note, JsonRpcMessage::Notification(_)));

        let resp: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":7,"result":{}}"#).unwrap();
        assert!(matches!(resp, JsonRpcMessage::Response(ref r) if r.id == RequestId::Number(7)));
    }

    #[test]
    fn test_invalid_messages_rejected() {
        assert!(serde_json::from_str::<JsonRpcMessage>(r#"{"jsonrpc":"1.0","id":1,"method":"x"}"#).is_err());
        assert!(serde_json::from_str::<JsonRpcMessage>(r#"{"jsonrpc":"2.0"}"#).is_err());
        assert!(serde_json::from_str::<JsonRpcMessage>("[1,2]").is_err());
    }

    #[test]
    fn test_batch_parsing() {
        let batch = JsonRpcMessage::parse_batch(json!([
            {"jsonrpc": "2.0", "id": 1, "method": "ping"},
            {"jsonrpc": "2.0", "method": "notifications/initialized"}
        ]))
        .unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch[0].is_request());
        assert_eq!(batch[1].method(), Some("notifications/initialized"));
    }

    #[test]
    fn test_error_response_into_result() {
        let resp: JsonRpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": 1,
            "error": {"code": -32601, "message": "Method not found"}
        }))
        .unwrap();
        let err = resp.into_result().unwrap_err();
        assert!(err.is_method_not_found());
    }

    #[test]
    fn test_tool_def_keeps_extra_fields() {
        let tool: ToolDef = serde_json::from_value(json!({
            "name": "search", "description": "Search", "inputSchema": {"type": "object"}
        }))
        .unwrap();
        assert_eq!(tool.name, "search");
        assert_eq!(
            serde_json::to_value(&tool).unwrap()["inputSchema"],
            json!({"type": "object"})
        );
    }

    #[test]
    fn test_error_mapping() {
        let not_found = JsonRpcError::from(&SwitchyardError::NotFound("Tool x".into()));
        assert_eq!(not_found.code, error_codes::INVALID_PARAMS);
        assert_eq!(not_found.message, "Tool x not found");

        let other = JsonRpcError::from(&SwitchyardError::Transport("boom".into()));
        assert_eq!(other.code, error_codes::INTERNAL_ERROR);
    }
}
