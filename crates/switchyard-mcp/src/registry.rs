//! The proxy registry: one virtual server per downstream plus the inbound
//! sessions bound to it.
//!
//! The registry is an owned value. The HTTP gateway and the stdio runner both
//! receive it explicitly and route every caller through it.

use crate::connection::{ConnectionDeps, DownstreamConnection};
use crate::server::VirtualServer;
use crate::session::{
    HttpReply, InboundRequest, ServerTransport, SessionEvent, SessionTable, SessionTransport,
    SseServerTransport, SseStream, StdioServerTransport, StreamableHttpServerTransport,
    StreamableSession,
};
use futures_util::future::join_all;
use http::StatusCode;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use switchyard_core::{ActiveGroup, Config, SwitchyardError, SwitchyardResult};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Which downstreams the registry brings up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupMode {
    /// Every configured downstream, initialized eagerly.
    Http,
    /// Only `target`, initialized in the background unless it sets
    /// `panicIfInvalid`.
    Stdio { target: String },
}

/// A virtual server and the sessions currently bound to it.
pub struct ManagedServer {
    server: Arc<VirtualServer>,
    sessions: SessionTable,
}

impl ManagedServer {
    pub fn server(&self) -> &Arc<VirtualServer> {
        &self.server
    }

    pub fn connection(&self) -> &Arc<DownstreamConnection> {
        self.server.connection()
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }
}

pub struct ProxyRegistry {
    servers: RwLock<HashMap<String, Arc<ManagedServer>>>,
    mode: StartupMode,
}

impl ProxyRegistry {
    /// Build and start the registry.
    ///
    /// A downstream that fails to initialize is logged and left out, so
    /// requests for it get "not found". With `panicIfInvalid` set on that
    /// downstream the failure aborts startup instead.
    pub async fn start(
        config: &Config,
        group: &ActiveGroup,
        deps: ConnectionDeps,
        mode: StartupMode,
    ) -> SwitchyardResult<Self> {
        let version = config.proxy.version.clone();
        let selected: Vec<(&String, _)> = match &mode {
            StartupMode::Http => config.mcp_servers.iter().collect(),
            StartupMode::Stdio { target } => {
                let downstream = config.mcp_servers.get_key_value(target).ok_or_else(|| {
                    SwitchyardError::Config(format!("Downstream server \"{target}\" not found"))
                })?;
                vec![downstream]
            }
        };

        let connections: Vec<Arc<DownstreamConnection>> = selected
            .into_iter()
            .map(|(name, downstream)| {
                Arc::new(DownstreamConnection::new(
                    name.clone(),
                    downstream.clone(),
                    group.contains(name),
                    deps.clone(),
                ))
            })
            .collect();

        let mut servers = HashMap::new();
        match &mode {
            StartupMode::Stdio { .. } => {
                for conn in connections {
                    if conn.config().options.panic_if_invalid() {
                        conn.ensure_initialized().await?;
                        info!(server = %conn.name(), "Connected");
                    } else {
                        conn.set_deferred(true);
                        conn.spawn_initialization();
                    }
                    servers.insert(conn.name().to_string(), managed(conn, &version));
                }
            }
            StartupMode::Http => {
                let outcomes = join_all(connections.iter().map(|conn| conn.ensure_initialized())).await;
                for (conn, outcome) in connections.into_iter().zip(outcomes) {
                    match outcome {
                        Ok(()) => {
                            info!(server = %conn.name(), transport = ?conn.config().resolve_transport_kind().ok(), "Connected");
                            servers.insert(conn.name().to_string(), managed(conn, &version));
                        }
                        Err(e) if conn.config().options.panic_if_invalid() => {
                            error!(server = %conn.name(), error = %e, "Failed to initialize downstream");
                            return Err(e);
                        }
                        Err(e) => {
                            error!(server = %conn.name(), error = %e, "Failed to initialize downstream, skipping");
                            conn.close().await;
                        }
                    }
                }
            }
        }

        info!(servers = servers.len(), group = ?group.name(), "Proxy registry started");
        Ok(Self {
            servers: RwLock::new(servers),
            mode,
        })
    }

    pub fn mode(&self) -> &StartupMode {
        &self.mode
    }

    /// Registered downstream names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get(&self, name: &str) -> Option<Arc<ManagedServer>> {
        self.servers.read().get(name).cloned()
    }

    fn require(&self, name: &str) -> SwitchyardResult<Arc<ManagedServer>> {
        self.get(name)
            .ok_or_else(|| SwitchyardError::NotFound(format!("MCP server {name}")))
    }

    /// Open a legacy SSE session on `name`. `endpoint` is the absolute URL
    /// callers must POST their messages to. The session is tracked until the
    /// returned stream is dropped.
    pub fn handle_sse(&self, name: &str, endpoint: &str) -> SwitchyardResult<SseStream> {
        let managed = self.require(name)?;
        let session = SseServerTransport::start(endpoint);
        let session_id = session.transport.id().to_string();

        managed
            .sessions
            .insert(session_id.clone(), SessionTransport::Sse(session.transport.clone()));
        managed.server.serve(session.transport.clone(), session.inbound);
        debug!(server = %name, session_id = %session_id, "SSE session opened");

        let owner = managed.clone();
        let transport = session.transport;
        let disconnected = session.disconnected;
        let server_name = name.to_string();
        tokio::spawn(async move {
            let _ = disconnected.await;
            owner.sessions.remove(&session_id);
            if let Err(e) = transport.close().await {
                warn!(server = %server_name, session_id = %session_id, error = %e, "Error closing SSE session");
            }
            debug!(server = %server_name, session_id = %session_id, "SSE session removed");
        });

        Ok(session.stream)
    }

    /// Handle one streamable HTTP request on `name`.
    pub async fn handle_streamable(&self, name: &str, request: InboundRequest) -> SwitchyardResult<HttpReply> {
        let managed = self.require(name)?;

        if let Some(SessionTransport::Streamable(transport)) =
            request.session_id().and_then(|id| managed.sessions.get(&id))
        {
            return Ok(reply_or_internal_error(
                name,
                transport.handle_request(request).await,
            ));
        }

        let StreamableSession {
            transport,
            inbound,
            mut events,
        } = StreamableHttpServerTransport::new(|| Uuid::new_v4().to_string());

        let owner = managed.clone();
        let registered = transport.clone();
        let server_name = name.to_string();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    SessionEvent::Established { session_id, ack } => {
                        owner
                            .sessions
                            .insert(session_id.clone(), SessionTransport::Streamable(registered.clone()));
                        debug!(server = %server_name, session_id = %session_id, "Streamable HTTP session registered");
                        let _ = ack.send(());
                    }
                    SessionEvent::Closed { session_id } => {
                        owner.sessions.remove(&session_id);
                        debug!(server = %server_name, session_id = %session_id, "Streamable HTTP session removed");
                    }
                }
            }
        });

        managed.server.serve(transport.clone(), inbound);
        let reply = reply_or_internal_error(name, transport.handle_request(request).await);

        if transport.session_id().is_none() {
            if let Err(e) = transport.close().await {
                debug!(server = %name, error = %e, "Error closing unestablished streamable HTTP transport");
            }
        }
        Ok(reply)
    }

    /// Accept a message posted on the SSE companion channel. Requests that
    /// name no live SSE session fall through to the streamable HTTP handler.
    pub async fn handle_post_message(&self, name: &str, request: InboundRequest) -> SwitchyardResult<HttpReply> {
        let managed = self.require(name)?;
        if let Some(SessionTransport::Sse(transport)) =
            request.session_id().and_then(|id| managed.sessions.get(&id))
        {
            return Ok(transport.handle_post_message(&request.body));
        }
        self.handle_streamable(name, request).await
    }

    /// Serve the stdio target over `reader`/`writer` until the reader hits EOF.
    pub async fn serve_stdio<R, W>(&self, reader: R, writer: W) -> SwitchyardResult<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let StartupMode::Stdio { target } = &self.mode else {
            return Err(SwitchyardError::Config(
                "Registry was not started in stdio mode".into(),
            ));
        };
        let managed = self.require(target)?;
        let (transport, inbound) = StdioServerTransport::start(reader, writer);
        info!(server = %target, "Serving over stdio");

        let served = managed.server.serve(transport.clone(), inbound);
        if let Err(e) = served.await {
            warn!(server = %target, error = %e, "stdio session task ended abnormally");
        }
        transport.close().await
    }

    /// Close every session and every connection. Failures are logged and
    /// skipped. The registry is empty afterwards.
    pub async fn shutdown(&self) {
        let servers = std::mem::take(&mut *self.servers.write());
        for (name, managed) in servers {
            for (session_id, session) in managed.sessions.drain() {
                if let Err(e) = session.close().await {
                    warn!(server = %name, session_id = %session_id, error = %e, "Error closing session");
                }
            }
            managed.connection().close().await;
            info!(server = %name, "Shut down");
        }
    }
}

fn managed(connection: Arc<DownstreamConnection>, version: &str) -> Arc<ManagedServer> {
    Arc::new(ManagedServer {
        server: Arc::new(VirtualServer::new(connection, version)),
        sessions: SessionTable::new(),
    })
}

fn reply_or_internal_error(name: &str, outcome: SwitchyardResult<HttpReply>) -> HttpReply {
    outcome.unwrap_or_else(|e| {
        error!(server = %name, error = %e, "Error handling streamable HTTP request");
        HttpReply::json(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": "Internal server error"}),
        )
    })
}
