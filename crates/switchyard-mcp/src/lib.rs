//! MCP plumbing for the Switchyard proxy.
//!
//! Downstream servers are reached through [`transport`] implementations and
//! driven by an [`McpClient`]. A [`DownstreamConnection`] adds lazy
//! initialization, capability caching, tool filtering and redaction on top.
//! Each connection is republished as a [`VirtualServer`], which the
//! [`ProxyRegistry`] binds to inbound stdio, SSE and streamable HTTP sessions.

/// Capability listing cache.
pub mod cache;
/// JSON-RPC client for one downstream.
pub mod client;
/// Downstream connection manager.
pub mod connection;
/// Tool allow/block filter.
pub mod filter;
/// JSON-RPC and MCP message types.
pub mod protocol;
/// Proxy registry.
pub mod registry;
/// Virtual MCP server.
pub mod server;
/// Inbound session transports.
pub mod session;
/// Downstream transports.
pub mod transport;

pub use client::McpClient;
pub use connection::{ConnectionDeps, ConnectionState, DefaultConnector, DownstreamConnection, TransportConnector};
pub use filter::ToolFilter;
pub use registry::{ManagedServer, ProxyRegistry, StartupMode};
pub use server::VirtualServer;
pub use session::{HttpReply, InboundRequest, ReplyBody, SseEvent, SseStream};
pub use transport::Transport;
