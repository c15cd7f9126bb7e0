use super::{header_map, Transport, SESSION_HEADER};
use crate::protocol::JsonRpcMessage;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode, Url};
use std::collections::HashMap;
use switchyard_core::{SwitchyardError, SwitchyardResult, TransportKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Downstream reached over MCP streamable HTTP. Every message is a POST; the
/// server answers with plain JSON, an SSE stream, or `202 Accepted`, and
/// pins the conversation to a session with the `mcp-session-id` header.
pub struct StreamableHttpClientTransport {
    url: Url,
    headers: HeaderMap,
    http: Client,
    session_id: Mutex<Option<String>>,
    inbound: Mutex<Option<mpsc::UnboundedSender<JsonRpcMessage>>>,
    streams: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamableHttpClientTransport {
    pub fn new(url: String, headers: HashMap<String, String>) -> SwitchyardResult<Self> {
        let url = Url::parse(&url).map_err(|e| {
            SwitchyardError::Config(format!("Invalid streamable HTTP url '{url}': {e}"))
        })?;
        Ok(Self {
            url,
            headers: header_map(&headers)?,
            http: Client::new(),
            session_id: Mutex::new(None),
            inbound: Mutex::new(None),
            streams: Mutex::new(Vec::new()),
        })
    }

    /// Session id assigned by the downstream, once known.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    fn request_headers(&self) -> HeaderMap {
        let mut headers = self.headers.clone();
        if let Some(id) = self.session_id.lock().as_deref() {
            if let Ok(value) = HeaderValue::from_str(id) {
                headers.insert(SESSION_HEADER, value);
            }
        }
        headers
    }

    fn sender(&self) -> SwitchyardResult<mpsc::UnboundedSender<JsonRpcMessage>> {
        self.inbound.lock().clone().ok_or_else(|| {
            SwitchyardError::Transport("streamable HTTP transport is not connected".into())
        })
    }

    async fn dispatch_json(response: Response, tx: &mpsc::UnboundedSender<JsonRpcMessage>) -> SwitchyardResult<()> {
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SwitchyardError::Transport(format!("Invalid JSON response: {e}")))?;
        for message in JsonRpcMessage::parse_batch(body)? {
            let _ = tx.send(message);
        }
        Ok(())
    }

    fn spawn_event_stream(&self, response: Response, tx: mpsc::UnboundedSender<JsonRpcMessage>) {
        let handle = tokio::spawn(async move {
            let mut events = response.bytes_stream().eventsource();
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) if event.event.is_empty() || event.event == "message" => {
                        match serde_json::from_str::<JsonRpcMessage>(&event.data) {
                            Ok(message) => {
                                if tx.send(message).is_err() {
                                    break;
                                }
                            }
                            Err(e) => debug!(error = %e, "Non-JSON-RPC SSE message"),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Streamable HTTP response stream error");
                        break;
                    }
                }
            }
        });
        let mut streams = self.streams.lock();
        streams.retain(|h| !h.is_finished());
        streams.push(handle);
    }
}

#[async_trait]
impl Transport for StreamableHttpClientTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::StreamableHttp
    }

    async fn connect(&self) -> SwitchyardResult<mpsc::UnboundedReceiver<JsonRpcMessage>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbound.lock() = Some(tx);
        Ok(rx)
    }

    async fn send(&self, message: &JsonRpcMessage) -> SwitchyardResult<()> {
        let tx = self.sender()?;
        let response = self
            .http
            .post(self.url.clone())
            .headers(self.request_headers())
            .header(ACCEPT, "application/json, text/event-stream")
            .json(message)
            .send()
            .await
            .map_err(|e| SwitchyardError::Transport(format!("Failed to POST message: {e}")))?;

        if let Some(id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock() = Some(id.to_string());
        }

        let status = response.status();
        if status == StatusCode::ACCEPTED {
            return Ok(());
        }
        if !status.is_success() {
            return Err(SwitchyardError::Transport(format!(
                "Streamable HTTP request rejected with HTTP {status}"
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("text/event-stream") {
            self.spawn_event_stream(response, tx);
            Ok(())
        } else if content_type.starts_with("application/json") {
            Self::dispatch_json(response, &tx).await
        } else if message.is_request() {
            Err(SwitchyardError::Transport(format!(
                "Unexpected content type '{content_type}'"
            )))
        } else {
            Ok(())
        }
    }

    async fn close(&self) -> SwitchyardResult<()> {
        for handle in self.streams.lock().drain(..) {
            handle.abort();
        }
        self.inbound.lock().take();

        let session = self.session_id.lock().take();
        if let Some(id) = session {
            let result = self
                .http
                .delete(self.url.clone())
                .headers(self.headers.clone())
                .header(SESSION_HEADER, id)
                .send()
                .await;
            // Servers may not support explicit termination (405).
            if let Err(e) = result {
                debug!(error = %e, "Failed to terminate streamable HTTP session");
            }
        }
        Ok(())
    }
}
