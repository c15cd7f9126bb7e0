//! HTTP surface of the Switchyard proxy.
//!
//! [`GatewayServer::build`] turns a [`ProxyRegistry`](switchyard_mcp::ProxyRegistry)
//! into an axum router with per-downstream bearer auth and access logging.

/// Auth and access-log middleware.
pub mod middleware;
mod reply;
/// Router and handlers.
pub mod server;

pub use server::{GatewayServer, GatewayState};
