//! Inbound (server-side) session transports.
//!
//! These adapt caller-facing bindings (stdio, SSE with a companion POST
//! channel, stateful streamable HTTP) to a pair of message channels that a
//! [`VirtualServer`](crate::server::VirtualServer) serves. HTTP adapters speak
//! in terms of [`InboundRequest`] and [`HttpReply`] so they stay independent
//! of the web framework.

mod sse;
mod stdio;
mod streamable;
mod table;

pub use sse::{SseServerTransport, SseSession};
pub use stdio::StdioServerTransport;
pub use streamable::{SessionEvent, StreamableHttpServerTransport, StreamableSession};
pub use table::{SessionTable, SessionTransport};

use crate::protocol::JsonRpcMessage;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};
use switchyard_core::SwitchyardResult;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Outbound half of an inbound session.
#[async_trait]
pub trait ServerTransport: Send + Sync {
    /// Session id, once one has been assigned.
    fn session_id(&self) -> Option<String>;

    /// Deliver a message to the caller.
    async fn send(&self, message: JsonRpcMessage) -> SwitchyardResult<()>;

    /// End the session. Idempotent.
    async fn close(&self) -> SwitchyardResult<()>;
}

/// One server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn message(message: &JsonRpcMessage) -> SwitchyardResult<Self> {
        Ok(Self {
            event: Some("message".into()),
            data: serde_json::to_string(message)?,
        })
    }
}

/// Event stream handed to the HTTP layer. Dropping it (the caller went away)
/// fires the disconnect signal the session owner waits on.
#[derive(Debug)]
pub struct SseStream {
    inner: UnboundedReceiverStream<SseEvent>,
    _disconnect: Option<oneshot::Sender<()>>,
}

impl SseStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<SseEvent>, disconnect: Option<oneshot::Sender<()>>) -> Self {
        Self {
            inner: UnboundedReceiverStream::new(rx),
            _disconnect: disconnect,
        }
    }
}

impl Stream for SseStream {
    type Item = SseEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// HTTP request as seen by the session transports.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InboundRequest {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
        }
    }

    /// Session id from the `mcp-session-id` header, else the `sessionId`
    /// query parameter.
    pub fn session_id(&self) -> Option<String> {
        self.headers
            .get(crate::transport::SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(String::from)
            .or_else(|| query_param(&self.uri, "sessionId"))
    }

    fn header_str(&self, name: http::header::HeaderName) -> &str {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    pub(crate) fn accepts(&self, media_type: &str) -> bool {
        let accept = self.header_str(http::header::ACCEPT);
        accept.is_empty() || accept.contains(media_type) || accept.contains("*/*")
    }
}

fn query_param(uri: &Uri, key: &str) -> Option<String> {
    uri.query()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.to_string())
        .filter(|v| !v.is_empty())
}

/// Body of an [`HttpReply`].
pub enum ReplyBody {
    Empty,
    Text(String),
    Json(Value),
    EventStream(SseStream),
}

/// HTTP response produced by a session transport.
pub struct HttpReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ReplyBody,
}

impl HttpReply {
    pub fn new(status: StatusCode, body: ReplyBody) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }

    pub fn empty(status: StatusCode) -> Self {
        Self::new(status, ReplyBody::Empty)
    }

    pub fn text(status: StatusCode, text: impl Into<String>) -> Self {
        Self::new(status, ReplyBody::Text(text.into()))
    }

    pub fn json(status: StatusCode, value: Value) -> Self {
        Self::new(status, ReplyBody::Json(value))
    }

    pub fn stream(stream: SseStream) -> Self {
        Self::new(StatusCode::OK, ReplyBody::EventStream(stream))
    }

    /// JSON-RPC error envelope with a null id, used before a request could
    /// be parsed.
    pub fn rpc_error(status: StatusCode, code: i64, message: &str) -> Self {
        Self::json(
            status,
            serde_json::json!({
                "jsonrpc": "2.0",
                "error": {"code": code, "message": message},
                "id": null
            }),
        )
    }

    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }
}

impl std::fmt::Debug for HttpReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let body = match &self.body {
            ReplyBody::Empty => "empty".to_string(),
            ReplyBody::Text(t) => format!("text({t})"),
            ReplyBody::Json(v) => format!("json({v})"),
            ReplyBody::EventStream(_) => "event-stream".to_string(),
        };
        f.debug_struct("HttpReply")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &body)
            .finish()
    }
}
