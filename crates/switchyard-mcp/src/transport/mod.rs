//! Client-side transports to downstream MCP servers.
//!
//! Each transport moves whole JSON-RPC messages: [`Transport::connect`] opens
//! the channel and returns the stream of messages the downstream sends,
//! [`Transport::send`] delivers one message, [`Transport::close`] tears the
//! channel down.

mod sse;
mod stdio;
mod streamable;

pub use sse::SseClientTransport;
pub use stdio::StdioTransport;
pub use streamable::StreamableHttpClientTransport;

use crate::protocol::JsonRpcMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use switchyard_core::{DownstreamConfig, SwitchyardError, SwitchyardResult, TransportKind};
use tokio::sync::mpsc;

/// Header carrying the streamable HTTP session id.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// A bidirectional message channel to one downstream.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport kind, used for keepalive decisions and logging.
    fn kind(&self) -> TransportKind;

    /// Open the channel. Messages from the downstream arrive on the returned
    /// receiver until the channel closes.
    async fn connect(&self) -> SwitchyardResult<mpsc::UnboundedReceiver<JsonRpcMessage>>;

    /// Deliver one message to the downstream.
    async fn send(&self, message: &JsonRpcMessage) -> SwitchyardResult<()>;

    /// Close the channel. Safe to call more than once.
    async fn close(&self) -> SwitchyardResult<()>;
}

/// Build the transport described by `config` without connecting it.
pub fn build_transport(
    name: &str,
    config: &DownstreamConfig,
) -> SwitchyardResult<Box<dyn Transport>> {
    let kind = config.resolve_transport_kind()?;
    let transport: Box<dyn Transport> = match kind {
        TransportKind::Stdio => {
            let command = config.command.clone().ok_or_else(|| {
                SwitchyardError::Config(format!("<{name}> command is required for stdio transport"))
            })?;
            Box::new(StdioTransport::new(
                command,
                config.args.clone(),
                child_environment(&config.env, |key| std::env::var(key).ok()),
            ))
        }
        TransportKind::Sse => Box::new(SseClientTransport::new(
            require_url(name, config, kind)?,
            config.headers.clone(),
        )?),
        TransportKind::StreamableHttp => Box::new(StreamableHttpClientTransport::new(
            require_url(name, config, kind)?,
            config.headers.clone(),
        )?),
    };
    Ok(transport)
}

fn require_url(name: &str, config: &DownstreamConfig, kind: TransportKind) -> SwitchyardResult<String> {
    config.url.clone().ok_or_else(|| {
        SwitchyardError::Config(format!("<{name}> url is required for {kind} transport"))
    })
}

/// Extra variables for a spawned downstream. Unless `MCP_DEBUG` is set in the
/// proxy's environment, the child is asked to keep quiet on stderr.
pub fn child_environment<F>(configured: &HashMap<String, String>, lookup: F) -> HashMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut env = configured.clone();
    if lookup("MCP_DEBUG").is_none() {
        if !env.contains_key("NODE_ENV") {
            env.insert(
                "NODE_ENV".into(),
                lookup("NODE_ENV").unwrap_or_else(|| "production".into()),
            );
        }
        env.insert("MCP_REMOTE_DEBUG".into(), "false".into());
        env.insert("DEBUG".into(), String::new());
    }
    env
}

pub(crate) fn header_map(
    headers: &HashMap<String, String>,
) -> SwitchyardResult<reqwest::header::HeaderMap> {
    let mut map = reqwest::header::HeaderMap::new();
    for (name, value) in headers {
        let name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| SwitchyardError::Config(format!("Invalid header name '{name}': {e}")))?;
        let value = reqwest::header::HeaderValue::from_str(value)
            .map_err(|e| SwitchyardError::Config(format!("Invalid value for header '{name}': {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}
