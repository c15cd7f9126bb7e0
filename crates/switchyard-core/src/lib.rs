//! Core types and error definitions for the Switchyard MCP proxy.
//!
//! This crate provides the foundational types shared across all Switchyard
//! crates: the unified error enum and the configuration model that describes
//! the proxy itself and every downstream MCP server it republishes.
//!
//! # Main types
//!
//! - [`SwitchyardError`] — Unified error enum for all Switchyard subsystems.
//! - [`SwitchyardResult`] — Convenience alias for `Result<T, SwitchyardError>`.
//! - [`Config`] — Fully normalized proxy configuration.
//! - [`DownstreamConfig`] — Connection parameters and options for one downstream.
//! - [`ActiveGroup`] — Resolved group membership predicate.

/// Configuration model and normalization.
pub mod config;
/// Error taxonomy.
pub mod error;

pub use config::{
    ActiveGroup, Config, DownstreamConfig, ProxyOptions, ProxySettings, RedactionOptions,
    RedactionSettings, ServeMode, ToolFilterConfig, TransportKind,
};
pub use error::{SwitchyardError, SwitchyardResult, METHOD_NOT_FOUND};
