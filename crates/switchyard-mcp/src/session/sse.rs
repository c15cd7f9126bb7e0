use super::{HttpReply, ServerTransport, SseEvent, SseStream};
use crate::protocol::JsonRpcMessage;
use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use switchyard_core::{SwitchyardError, SwitchyardResult};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use uuid::Uuid;

/// Server side of a legacy SSE session: one long-lived event stream for
/// server-to-client messages plus a POST endpoint for the other direction.
pub struct SseServerTransport {
    session_id: String,
    events: Mutex<Option<mpsc::UnboundedSender<SseEvent>>>,
    inbound: Mutex<Option<mpsc::UnboundedSender<JsonRpcMessage>>>,
    closed: AtomicBool,
}

/// Everything the owner of a new SSE session needs.
pub struct SseSession {
    pub transport: Arc<SseServerTransport>,
    /// Body of the `GET …/sse` response.
    pub stream: SseStream,
    /// Messages posted by the caller.
    pub inbound: mpsc::UnboundedReceiver<JsonRpcMessage>,
    /// Resolves when the caller drops the event stream.
    pub disconnected: oneshot::Receiver<()>,
}

impl SseServerTransport {
    /// Open a session. The first event tells the caller where to POST:
    /// `{endpoint}?sessionId={id}`.
    pub fn start(endpoint: &str) -> SseSession {
        let session_id = Uuid::new_v4().to_string();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (disconnect_tx, disconnect_rx) = oneshot::channel();

        let separator = if endpoint.contains('?') { '&' } else { '?' };
        let _ = event_tx.send(SseEvent {
            event: Some("endpoint".into()),
            data: format!("{endpoint}{separator}sessionId={session_id}"),
        });

        let transport = Arc::new(Self {
            session_id,
            events: Mutex::new(Some(event_tx)),
            inbound: Mutex::new(Some(inbound_tx)),
            closed: AtomicBool::new(false),
        });

        SseSession {
            transport,
            stream: SseStream::new(event_rx, Some(disconnect_tx)),
            inbound: inbound_rx,
            disconnected: disconnect_rx,
        }
    }

    pub fn id(&self) -> &str {
        &self.session_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Accept one message posted on the companion channel.
    pub fn handle_post_message(&self, body: &Bytes) -> HttpReply {
        let Some(inbound) = self.inbound.lock().clone() else {
            return HttpReply::text(StatusCode::INTERNAL_SERVER_ERROR, "SSE connection not established");
        };
        let message = match serde_json::from_slice::<JsonRpcMessage>(body) {
            Ok(message) => message,
            Err(e) => {
                debug!(session_id = %self.session_id, error = %e, "Invalid message posted");
                return HttpReply::text(StatusCode::BAD_REQUEST, format!("Invalid message: {e}"));
            }
        };
        if inbound.send(message).is_err() {
            return HttpReply::text(StatusCode::INTERNAL_SERVER_ERROR, "Session is closing");
        }
        HttpReply::text(StatusCode::ACCEPTED, "Accepted")
    }
}

#[async_trait]
impl ServerTransport for SseServerTransport {
    fn session_id(&self) -> Option<String> {
        Some(self.session_id.clone())
    }

    async fn send(&self, message: JsonRpcMessage) -> SwitchyardResult<()> {
        let event = SseEvent::message(&message)?;
        let guard = self.events.lock();
        let events = guard
            .as_ref()
            .ok_or_else(|| SwitchyardError::Transport("SSE session is closed".into()))?;
        events
            .send(event)
            .map_err(|_| SwitchyardError::Transport("SSE stream is gone".into()))
    }

    async fn close(&self) -> SwitchyardResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.events.lock().take();
        self.inbound.lock().take();
        debug!(session_id = %self.session_id, "SSE session closed");
        Ok(())
    }
}
