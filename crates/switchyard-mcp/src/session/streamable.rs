use super::{HttpReply, InboundRequest, ServerTransport, SseEvent, SseStream};
use crate::protocol::{error_codes, JsonRpcMessage, RequestId};
use crate::transport::SESSION_HEADER;
use async_trait::async_trait;
use http::header::{ALLOW, CONTENT_TYPE};
use http::{HeaderName, Method, StatusCode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use switchyard_core::{SwitchyardError, SwitchyardResult};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Error code for session-level rejections.
const SESSION_ERROR: i64 = -32000;

/// Session lifecycle notifications for the owner of the session table.
#[derive(Debug)]
pub enum SessionEvent {
    /// An `initialize` request created the session. The transport waits for
    /// `ack` before it forwards the request, so the session is routable by
    /// the time any reply reaches the caller.
    Established {
        session_id: String,
        ack: oneshot::Sender<()>,
    },
    /// The session ended (explicit DELETE or transport close).
    Closed { session_id: String },
}

#[derive(Default)]
struct Streams {
    next_key: u64,
    open: HashMap<u64, OpenStream>,
    by_request: HashMap<RequestId, u64>,
    standalone: Option<mpsc::UnboundedSender<SseEvent>>,
}

struct OpenStream {
    tx: mpsc::UnboundedSender<SseEvent>,
    remaining: usize,
}

/// Server side of a stateful streamable HTTP session.
///
/// Each POST carrying requests gets its own event stream that ends once
/// every request in it has been answered. A GET opens the session's single
/// standalone stream for server-initiated messages. DELETE ends the session.
pub struct StreamableHttpServerTransport {
    id_generator: Box<dyn Fn() -> String + Send + Sync>,
    session_id: Mutex<Option<String>>,
    inbound: Mutex<Option<mpsc::UnboundedSender<JsonRpcMessage>>>,
    events: Mutex<Option<mpsc::UnboundedSender<SessionEvent>>>,
    streams: Mutex<Streams>,
    closed: AtomicBool,
}

/// A freshly created streamable HTTP transport and its channels.
pub struct StreamableSession {
    pub transport: Arc<StreamableHttpServerTransport>,
    /// Messages posted by the caller.
    pub inbound: mpsc::UnboundedReceiver<JsonRpcMessage>,
    /// Session lifecycle events.
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl StreamableHttpServerTransport {
    pub fn new(id_generator: impl Fn() -> String + Send + Sync + 'static) -> StreamableSession {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            id_generator: Box::new(id_generator),
            session_id: Mutex::new(None),
            inbound: Mutex::new(Some(inbound_tx)),
            events: Mutex::new(Some(events_tx)),
            streams: Mutex::new(Streams::default()),
            closed: AtomicBool::new(false),
        });
        StreamableSession {
            transport,
            inbound: inbound_rx,
            events: events_rx,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Handle one HTTP request addressed to this session. An `Err` means the
    /// request could not be processed at all and no reply was produced.
    pub async fn handle_request(&self, request: InboundRequest) -> SwitchyardResult<HttpReply> {
        match request.method {
            Method::POST => self.handle_post(request).await,
            Method::GET => Ok(self.handle_get(&request)),
            Method::DELETE => self.handle_delete(&request).await,
            _ => Ok(HttpReply::rpc_error(
                StatusCode::METHOD_NOT_ALLOWED,
                SESSION_ERROR,
                "Method not allowed.",
            )
            .with_header(ALLOW, "GET, POST, DELETE")),
        }
    }

    async fn handle_post(&self, request: InboundRequest) -> SwitchyardResult<HttpReply> {
        if !request.accepts("application/json") || !request.accepts("text/event-stream") {
            return Ok(HttpReply::rpc_error(
                StatusCode::NOT_ACCEPTABLE,
                SESSION_ERROR,
                "Not Acceptable: Client must accept both application/json and text/event-stream",
            ));
        }
        let content_type = request
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !content_type.contains("application/json") {
            return Ok(HttpReply::rpc_error(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                SESSION_ERROR,
                "Unsupported Media Type: Content-Type must be application/json",
            ));
        }

        let Ok(body) = serde_json::from_slice::<serde_json::Value>(&request.body) else {
            return Ok(HttpReply::rpc_error(
                StatusCode::BAD_REQUEST,
                error_codes::PARSE_ERROR,
                "Parse error: Invalid JSON",
            ));
        };
        let Ok(messages) = JsonRpcMessage::parse_batch(body) else {
            return Ok(HttpReply::rpc_error(
                StatusCode::BAD_REQUEST,
                error_codes::INVALID_REQUEST,
                "Invalid Request: not a JSON-RPC message",
            ));
        };

        let is_initialize = messages
            .iter()
            .any(|m| m.is_request() && m.method() == Some("initialize"));
        if is_initialize {
            if let Some(rejection) = self.establish(messages.len()).await {
                return Ok(rejection);
            }
        } else if let Err(rejection) = self.validate_session(&request) {
            return Ok(rejection);
        }

        let request_ids: Vec<RequestId> = messages
            .iter()
            .filter_map(|m| match m {
                JsonRpcMessage::Request(r) => Some(r.id.clone()),
                _ => None,
            })
            .collect();

        if request_ids.is_empty() {
            self.forward(messages)?;
            return Ok(HttpReply::empty(StatusCode::ACCEPTED));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut streams = self.streams.lock();
            let key = streams.next_key;
            streams.next_key += 1;
            for id in &request_ids {
                streams.by_request.insert(id.clone(), key);
            }
            streams.open.insert(
                key,
                OpenStream {
                    tx,
                    remaining: request_ids.len(),
                },
            );
        }
        self.forward(messages)?;
        Ok(self.with_session_header(HttpReply::stream(SseStream::new(rx, None))))
    }

    /// Assign the session id and wait until the owner has registered it.
    async fn establish(&self, batch_len: usize) -> Option<HttpReply> {
        if batch_len > 1 {
            return Some(HttpReply::rpc_error(
                StatusCode::BAD_REQUEST,
                error_codes::INVALID_REQUEST,
                "Invalid Request: Only one initialization request is allowed",
            ));
        }
        let session_id = {
            let mut current = self.session_id.lock();
            if current.is_some() {
                return Some(HttpReply::rpc_error(
                    StatusCode::BAD_REQUEST,
                    error_codes::INVALID_REQUEST,
                    "Invalid Request: Server already initialized",
                ));
            }
            let id = (self.id_generator)();
            *current = Some(id.clone());
            id
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        let sent = self.events.lock().as_ref().map(|events| {
            events.send(SessionEvent::Established {
                session_id: session_id.clone(),
                ack: ack_tx,
            })
        });
        if matches!(sent, Some(Ok(()))) {
            let _ = ack_rx.await;
        }
        debug!(session_id = %session_id, "Streamable HTTP session established");
        None
    }

    fn validate_session(&self, request: &InboundRequest) -> Result<(), HttpReply> {
        let Some(current) = self.session_id.lock().clone() else {
            return Err(HttpReply::rpc_error(
                StatusCode::BAD_REQUEST,
                SESSION_ERROR,
                "Bad Request: Server not initialized",
            ));
        };
        let Some(requested) = request.session_id() else {
            return Err(HttpReply::rpc_error(
                StatusCode::BAD_REQUEST,
                SESSION_ERROR,
                "Bad Request: Mcp-Session-Id header is required",
            ));
        };
        if requested != current {
            return Err(HttpReply::rpc_error(
                StatusCode::NOT_FOUND,
                SESSION_ERROR,
                "Session not found",
            ));
        }
        Ok(())
    }

    fn forward(&self, messages: Vec<JsonRpcMessage>) -> SwitchyardResult<()> {
        let inbound = self
            .inbound
            .lock()
            .clone()
            .ok_or_else(|| SwitchyardError::Transport("streamable HTTP session is closed".into()))?;
        for message in messages {
            inbound
                .send(message)
                .map_err(|_| SwitchyardError::Transport("session is not being served".into()))?;
        }
        Ok(())
    }

    fn handle_get(&self, request: &InboundRequest) -> HttpReply {
        if !request.accepts("text/event-stream") {
            return HttpReply::rpc_error(
                StatusCode::NOT_ACCEPTABLE,
                SESSION_ERROR,
                "Not Acceptable: Client must accept text/event-stream",
            );
        }
        if let Err(rejection) = self.validate_session(request) {
            return rejection;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut streams = self.streams.lock();
            if streams.standalone.as_ref().is_some_and(|s| !s.is_closed()) {
                return HttpReply::rpc_error(
                    StatusCode::CONFLICT,
                    SESSION_ERROR,
                    "Conflict: Only one SSE stream is allowed per session",
                );
            }
            streams.standalone = Some(tx);
        }
        self.with_session_header(HttpReply::stream(SseStream::new(rx, None)))
    }

    async fn handle_delete(&self, request: &InboundRequest) -> SwitchyardResult<HttpReply> {
        if let Err(rejection) = self.validate_session(request) {
            return Ok(rejection);
        }
        self.close().await?;
        Ok(HttpReply::empty(StatusCode::OK))
    }

    fn with_session_header(&self, reply: HttpReply) -> HttpReply {
        match self.session_id.lock().clone() {
            Some(id) => reply.with_header(HeaderName::from_static(SESSION_HEADER), &id),
            None => reply,
        }
    }
}

#[async_trait]
impl ServerTransport for StreamableHttpServerTransport {
    fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    async fn send(&self, message: JsonRpcMessage) -> SwitchyardResult<()> {
        let event = SseEvent::message(&message)?;
        let mut streams = self.streams.lock();

        let JsonRpcMessage::Response(response) = &message else {
            return match &streams.standalone {
                Some(tx) if tx.send(event).is_ok() => Ok(()),
                _ => {
                    debug!(method = ?message.method(), "No standalone stream; dropping message");
                    Ok(())
                }
            };
        };

        let Some(key) = streams.by_request.remove(&response.id) else {
            return Err(SwitchyardError::Transport(format!(
                "No open stream for response {}",
                response.id
            )));
        };
        let finished = match streams.open.get_mut(&key) {
            Some(stream) => {
                let _ = stream.tx.send(event);
                stream.remaining = stream.remaining.saturating_sub(1);
                stream.remaining == 0
            }
            None => false,
        };
        if finished {
            // Dropping the sender ends the caller's event stream.
            streams.open.remove(&key);
        }
        Ok(())
    }

    async fn close(&self) -> SwitchyardResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        {
            let mut streams = self.streams.lock();
            streams.open.clear();
            streams.by_request.clear();
            streams.standalone = None;
        }
        self.inbound.lock().take();

        let events = self.events.lock().take();
        let session_id = self.session_id.lock().clone();
        if let (Some(events), Some(session_id)) = (events, session_id) {
            debug!(session_id = %session_id, "Streamable HTTP session closed");
            let _ = events.send(SessionEvent::Closed { session_id });
        }
        Ok(())
    }
}
