use std::sync::Arc;

/// JSON-RPC "method not found" error code. Downstreams answer optional
/// capability requests they do not implement with this code.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Top-level error type for the Switchyard proxy.
///
/// Each variant corresponds to one failure class of the proxy engine.
#[derive(Debug, thiserror::Error)]
pub enum SwitchyardError {
    /// Bad or missing transport parameters, or an invalid configuration file.
    #[error("Config error: {0}")]
    Config(String),

    /// The downstream could not be reached or rejected the MCP handshake.
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// Unknown downstream name, session, tool or prompt.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing or invalid bearer token at the HTTP boundary.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A bounded downstream call did not finish in time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The downstream answered with a JSON-RPC error object.
    #[error("MCP error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Human readable message from the downstream.
        message: String,
        /// Optional structured payload.
        data: Option<serde_json::Value>,
    },

    /// Any other failure talking to a downstream or an inbound client.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The redaction collaborator failed to start or to process a payload.
    #[error("Redaction error: {0}")]
    Redaction(String),

    /// A shared initialization failure observed by every caller that joined
    /// the same in-flight handshake.
    #[error(transparent)]
    Initialization(Arc<SwitchyardError>),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`SwitchyardError`].
pub type SwitchyardResult<T> = Result<T, SwitchyardError>;

impl SwitchyardError {
    /// The underlying error, looking through shared initialization wrappers.
    pub fn root(&self) -> &SwitchyardError {
        match self {
            SwitchyardError::Initialization(inner) => inner.root(),
            other => other,
        }
    }

    /// True when the downstream reported that it does not implement a method.
    pub fn is_method_not_found(&self) -> bool {
        matches!(self.root(), SwitchyardError::Rpc { code, .. } if *code == METHOD_NOT_FOUND)
    }

    /// True for the `NotFound` class (unknown downstream, tool or prompt).
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), SwitchyardError::NotFound(_))
    }
}
