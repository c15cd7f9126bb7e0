use super::ServerTransport;
use crate::protocol::{error_codes, JsonRpcError, JsonRpcMessage, JsonRpcResponse, RequestId};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use switchyard_core::{SwitchyardError, SwitchyardResult};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Inbound session over a pair of byte streams (normally the process's own
/// stdin/stdout), one JSON-RPC message per line.
pub struct StdioServerTransport {
    writer: Mutex<Option<BoxedWriter>>,
    closed: AtomicBool,
}

impl StdioServerTransport {
    /// Start reading `reader`. Returns the transport and the receiver of
    /// parsed inbound messages; the receiver closes at EOF.
    pub fn start<R, W>(reader: R, writer: W) -> (Arc<Self>, mpsc::UnboundedReceiver<JsonRpcMessage>)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let transport = Arc::new(Self {
            writer: Mutex::new(Some(Box::new(writer))),
            closed: AtomicBool::new(false),
        });
        let (tx, rx) = mpsc::unbounded_channel();

        let this = Arc::clone(&transport);
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcMessage>(trimmed) {
                            Ok(message) => {
                                if tx.send(message).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "Invalid JSON-RPC line on stdin");
                                let reply = JsonRpcResponse::failure(
                                    RequestId::Number(0),
                                    JsonRpcError::new(error_codes::PARSE_ERROR, format!("Parse error: {e}")),
                                );
                                if let Err(e) = this.send(reply.into()).await {
                                    debug!(error = %e, "Could not report parse error");
                                }
                            }
                        }
                    }
                    Ok(None) => {
                        debug!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Error reading stdin");
                        break;
                    }
                }
            }
        });

        (transport, rx)
    }
}

#[async_trait]
impl ServerTransport for StdioServerTransport {
    fn session_id(&self) -> Option<String> {
        None
    }

    async fn send(&self, message: JsonRpcMessage) -> SwitchyardResult<()> {
        let mut line = serde_json::to_string(&message)?;
        line.push('\n');

        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| SwitchyardError::Transport("stdio session is closed".into()))?;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| SwitchyardError::Transport(format!("Failed to write to stdout: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| SwitchyardError::Transport(format!("Failed to flush stdout: {e}")))?;
        Ok(())
    }

    async fn close(&self) -> SwitchyardResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::JsonRpcResponse;
    use serde_json::json;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn test_lines_in_and_out() {
        let (mut client_in, server_in) = duplex(4096);
        let (server_out, mut client_out) = duplex(4096);
        let (transport, mut inbound) = StdioServerTransport::start(server_in, server_out);

        client_in
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"ping\"}\n\n")
            .await
            .unwrap();
        let message = inbound.recv().await.unwrap();
        assert_eq!(message.method(), Some("ping"));

        transport
            .send(JsonRpcResponse::success(RequestId::Number(7), json!({})).into())
            .await
            .unwrap();
        let mut buf = vec![0u8; 256];
        let n = client_out.read(&mut buf).await.unwrap();
        let written = String::from_utf8_lossy(&buf[..n]);
        assert!(written.ends_with('\n'));
        assert!(written.contains("\"id\":7"));

        drop(client_in);
        assert!(inbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_line_gets_parse_error() {
        let (mut client_in, server_in) = duplex(4096);
        let (server_out, mut client_out) = duplex(4096);
        let (_transport, _inbound) = StdioServerTransport::start(server_in, server_out);

        client_in.write_all(b"not json\n").await.unwrap();
        let mut buf = vec![0u8; 256];
        let n = client_out.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).contains("-32700"));
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (_client_in, server_in) = duplex(64);
        let (server_out, _client_out) = duplex(64);
        let (transport, _inbound) = StdioServerTransport::start(server_in, server_out);
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        let reply = JsonRpcResponse::success(RequestId::Number(1), json!({}));
        assert!(transport.send(reply.into()).await.is_err());
    }
}
