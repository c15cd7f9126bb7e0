use super::Transport;
use crate::protocol::JsonRpcMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use switchyard_core::{SwitchyardError, SwitchyardResult, TransportKind};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error};

/// Downstream reached through a spawned child process speaking
/// newline-delimited JSON-RPC on stdin/stdout. The child's stderr is
/// inherited so its diagnostics land next to the proxy's own.
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
}

impl StdioTransport {
    /// `env` is merged over the proxy's own environment.
    pub fn new(command: String, args: Vec<String>, env: HashMap<String, String>) -> Self {
        Self {
            command,
            args,
            env,
            stdin: Mutex::new(None),
            child: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn connect(&self) -> SwitchyardResult<mpsc::UnboundedReceiver<JsonRpcMessage>> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            SwitchyardError::Handshake(format!(
                "Failed to spawn MCP server '{}': {e}",
                self.command
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SwitchyardError::Handshake("MCP server stdin not available".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SwitchyardError::Handshake("MCP server stdout not available".into()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let command = self.command.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!(command = %command, "MCP server stdout closed");
                        break;
                    }
                    Ok(_) => {
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
                                debug!(line = %trimmed, error = %e, "Non-JSON-RPC line from MCP server");
                            }
                        }
                    }
                    Err(e) => {
                        error!(command = %command, error = %e, "Error reading MCP server stdout");
                        break;
                    }
                }
            }
        });

        *self.stdin.lock().await = Some(stdin);
        *self.child.lock().await = Some(child);
        Ok(rx)
    }

    async fn send(&self, message: &JsonRpcMessage) -> SwitchyardResult<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| SwitchyardError::Transport("stdio transport is not connected".into()))?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| SwitchyardError::Transport(format!("Failed to write to MCP stdin: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| SwitchyardError::Transport(format!("Failed to flush stdin: {e}")))?;
        Ok(())
    }

    async fn close(&self) -> SwitchyardResult<()> {
        // Closing stdin lets well-behaved servers exit on their own.
        self.stdin.lock().await.take();
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.start_kill() {
                debug!(command = %self.command, error = %e, "MCP server already exited");
            }
            let _ = child.wait().await;
        }
        Ok(())
    }
}
