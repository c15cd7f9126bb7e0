use super::{header_map, Transport};
use crate::protocol::JsonRpcMessage;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::{Client, Url};
use std::collections::HashMap;
use switchyard_core::{SwitchyardError, SwitchyardResult, TransportKind};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Downstream reached over a server-sent event stream. The server announces
/// the URL for client-to-server messages in an `endpoint` event; every
/// following `message` event carries one JSON-RPC message.
pub struct SseClientTransport {
    url: Url,
    headers: HeaderMap,
    http: Client,
    endpoint: Mutex<Option<Url>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SseClientTransport {
    pub fn new(url: String, headers: HashMap<String, String>) -> SwitchyardResult<Self> {
        let url = Url::parse(&url)
            .map_err(|e| SwitchyardError::Config(format!("Invalid SSE url '{url}': {e}")))?;
        Ok(Self {
            url,
            headers: header_map(&headers)?,
            http: Client::new(),
            endpoint: Mutex::new(None),
            reader: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Transport for SseClientTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn connect(&self) -> SwitchyardResult<mpsc::UnboundedReceiver<JsonRpcMessage>> {
        let response = self
            .http
            .get(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| SwitchyardError::Handshake(format!("Failed to open SSE stream: {e}")))?;

        if !response.status().is_success() {
            return Err(SwitchyardError::Handshake(format!(
                "SSE stream rejected with HTTP {}",
                response.status()
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<Url>();
        let base = self.url.clone();

        let handle = tokio::spawn(async move {
            let mut events = response.bytes_stream().eventsource();
            let mut endpoint_tx = Some(endpoint_tx);
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(url = %base, error = %e, "SSE stream error");
                        break;
                    }
                };
                match event.event.as_str() {
                    "endpoint" => match base.join(event.data.trim()) {
                        Ok(endpoint) => {
                            if let Some(sender) = endpoint_tx.take() {
                                let _ = sender.send(endpoint);
                            }
                        }
                        Err(e) => {
                            warn!(data = %event.data, error = %e, "Invalid SSE endpoint event");
                            break;
                        }
                    },
                    "" | "message" => match serde_json::from_str::<JsonRpcMessage>(&event.data) {
                        Ok(message) => {
                            if tx.send(message).is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!(error = %e, "Non-JSON-RPC SSE message"),
                    },
                    other => debug!(event = %other, "Ignoring SSE event"),
                }
            }
            debug!(url = %base, "SSE stream closed");
        });

        let endpoint = match endpoint_rx.await {
            Ok(endpoint) => endpoint,
            Err(_) => {
                handle.abort();
                return Err(SwitchyardError::Handshake(
                    "SSE stream ended before announcing an endpoint".into(),
                ));
            }
        };
        debug!(endpoint = %endpoint, "SSE endpoint received");

        *self.endpoint.lock() = Some(endpoint);
        *self.reader.lock() = Some(handle);
        Ok(rx)
    }

    async fn send(&self, message: &JsonRpcMessage) -> SwitchyardResult<()> {
        let endpoint = self
            .endpoint
            .lock()
            .clone()
            .ok_or_else(|| SwitchyardError::Transport("SSE transport is not connected".into()))?;

        let response = self
            .http
            .post(endpoint)
            .headers(self.headers.clone())
            .json(message)
            .send()
            .await
            .map_err(|e| SwitchyardError::Transport(format!("Failed to POST SSE message: {e}")))?;

        if !response.status().is_success() {
            return Err(SwitchyardError::Transport(format!(
                "SSE message rejected with HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn close(&self) -> SwitchyardResult<()> {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        self.endpoint.lock().take();
        Ok(())
    }
}
