//! Downstream connection manager.
//!
//! A [`DownstreamConnection`] owns the transport and RPC client for one
//! configured downstream. It initializes lazily (at most one handshake in
//! flight), caches and filters capability listings, forwards invocations
//! through the optional redaction transform, and keeps HTTP based
//! downstreams alive with a periodic ping.

use crate::cache::CapabilityCache;
use crate::client::McpClient;
use crate::filter::ToolFilter;
use crate::protocol::{PromptDef, ResourceDef, ToolDef};
use crate::transport::{build_transport, Transport};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::{DownstreamConfig, SwitchyardError, SwitchyardResult};
use switchyard_security::{AuditOperation, AuditSink, Redactor};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Listing timeout used when the downstream config does not set one.
pub const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(15);

/// Interval between keepalive pings for SSE and streamable HTTP downstreams.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Builds the transport for a downstream. The default builds real process
/// and HTTP transports; tests substitute in-memory ones.
pub trait TransportConnector: Send + Sync {
    /// Transport for downstream `name`, not yet connected.
    fn build(&self, name: &str, config: &DownstreamConfig) -> SwitchyardResult<Arc<dyn Transport>>;
}

/// Connector producing stdio, SSE and streamable HTTP transports.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConnector;

impl TransportConnector for DefaultConnector {
    fn build(&self, name: &str, config: &DownstreamConfig) -> SwitchyardResult<Arc<dyn Transport>> {
        build_transport(name, config).map(Arc::from)
    }
}

/// Collaborators shared by every connection of a registry.
#[derive(Clone)]
pub struct ConnectionDeps {
    /// Transport factory.
    pub connector: Arc<dyn TransportConnector>,
    /// Redaction service, required by downstreams with redaction enabled.
    pub redactor: Option<Arc<dyn Redactor>>,
    /// Audit sink for `verboseAudit`.
    pub audit: Option<Arc<dyn AuditSink>>,
}

impl ConnectionDeps {
    /// Deps without redaction or audit.
    pub fn new(connector: Arc<dyn TransportConnector>) -> Self {
        Self {
            connector,
            redactor: None,
            audit: None,
        }
    }

    /// Attach the redaction service and its audit sink.
    pub fn with_redaction(mut self, redactor: Arc<dyn Redactor>, audit: Arc<dyn AuditSink>) -> Self {
        self.redactor = Some(redactor);
        self.audit = Some(audit);
        self
    }
}

impl Default for ConnectionDeps {
    fn default() -> Self {
        Self::new(Arc::new(DefaultConnector))
    }
}

/// Observable lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
    Closed,
}

type SharedInit = Shared<BoxFuture<'static, Result<(), Arc<SwitchyardError>>>>;

enum InitState {
    Uninitialized,
    Initializing(SharedInit),
    Ready,
    Failed(Arc<SwitchyardError>),
    Closed,
}

struct Live {
    client: Arc<McpClient>,
    transport: Arc<dyn Transport>,
}

/// Connection to one downstream MCP server.
pub struct DownstreamConnection {
    name: String,
    config: DownstreamConfig,
    in_group: bool,
    deps: ConnectionDeps,
    filter: Option<ToolFilter>,
    deferred: AtomicBool,
    state: Mutex<InitState>,
    live: Mutex<Option<Live>>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
    tools: CapabilityCache<ToolDef>,
    prompts: CapabilityCache<PromptDef>,
    resources: CapabilityCache<ResourceDef>,
}

impl DownstreamConnection {
    /// Connection in the `Uninitialized` state. Nothing is spawned until the
    /// first call that needs the downstream.
    pub fn new(
        name: impl Into<String>,
        config: DownstreamConfig,
        in_group: bool,
        deps: ConnectionDeps,
    ) -> Self {
        let filter = ToolFilter::from_config(config.options.tool_filter.as_ref());
        Self {
            name: name.into(),
            config,
            in_group,
            deps,
            filter,
            deferred: AtomicBool::new(false),
            state: Mutex::new(InitState::Uninitialized),
            live: Mutex::new(None),
            keepalive: Mutex::new(None),
            tools: CapabilityCache::default(),
            prompts: CapabilityCache::default(),
            resources: CapabilityCache::default(),
        }
    }

    /// Let listings answer `[]` while the handshake is still running instead
    /// of waiting for it.
    pub fn set_deferred(&self, deferred: bool) {
        self.deferred.store(deferred, Ordering::SeqCst);
    }

    /// Configured downstream name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Normalized downstream configuration.
    pub fn config(&self) -> &DownstreamConfig {
        &self.config
    }

    /// Whether the downstream belongs to the active group.
    pub fn in_group(&self) -> bool {
        self.in_group
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        match &*self.state.lock() {
            InitState::Uninitialized => ConnectionState::Uninitialized,
            InitState::Initializing(_) => ConnectionState::Initializing,
            InitState::Ready => ConnectionState::Ready,
            InitState::Failed(_) => ConnectionState::Failed,
            InitState::Closed => ConnectionState::Closed,
        }
    }

    /// Bring the connection up, or join the handshake already in flight.
    ///
    /// Every caller that joins the same attempt receives the same outcome; a
    /// failure is reported as [`SwitchyardError::Initialization`] wrapping one
    /// shared error. A failed connection retries on the next call.
    pub async fn ensure_initialized(self: &Arc<Self>) -> SwitchyardResult<()> {
        let attempt = {
            let mut state = self.state.lock();
            match &*state {
                InitState::Ready => return Ok(()),
                InitState::Closed => {
                    return Err(SwitchyardError::Transport(format!(
                        "<{}> connection is closed",
                        self.name
                    )))
                }
                InitState::Initializing(attempt) => attempt.clone(),
                InitState::Uninitialized | InitState::Failed(_) => {
                    let this = Arc::clone(self);
                    let attempt = async move {
                        let outcome = this.initialize_once().await.map_err(Arc::new);
                        let mut state = this.state.lock();
                        if !matches!(*state, InitState::Closed) {
                            *state = match &outcome {
                                Ok(()) => InitState::Ready,
                                Err(e) => InitState::Failed(e.clone()),
                            };
                        }
                        outcome
                    }
                    .boxed()
                    .shared();
                    *state = InitState::Initializing(attempt.clone());
                    attempt
                }
            }
        };
        attempt.await.map_err(SwitchyardError::Initialization)
    }

    /// Start initialization in the background unless it is already running
    /// or done.
    pub fn spawn_initialization(self: &Arc<Self>) {
        if matches!(
            *self.state.lock(),
            InitState::Initializing(_) | InitState::Ready | InitState::Closed
        ) {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.ensure_initialized().await {
                error!(server = %this.name, error = %e, "Background initialization failed");
            }
        });
    }

    async fn initialize_once(&self) -> SwitchyardResult<()> {
        let kind = self.config.resolve_transport_kind()?;
        info!(server = %self.name, transport = %kind, "Initializing transport");

        if let Some(redaction) = self.config.options.active_redaction() {
            let redactor = self.deps.redactor.as_ref().ok_or_else(|| {
                SwitchyardError::Redaction(format!(
                    "<{}> redaction is enabled but no redaction service is configured",
                    self.name
                ))
            })?;
            redactor.initialize().await.map_err(|e| {
                SwitchyardError::Redaction(format!(
                    "Redaction service unavailable for client with redaction enabled: {e}"
                ))
            })?;
            info!(server = %self.name, keys = redaction.keys.len(), "Redaction enabled");
        }

        let transport = self.deps.connector.build(&self.name, &self.config)?;
        let client = Arc::new(McpClient::new(self.name.clone(), transport.clone()));
        if let Err(e) = client.connect().await {
            let _ = client.close().await;
            if let Err(close_err) = transport.close().await {
                debug!(server = %self.name, error = %close_err, "Failed to close transport after handshake error");
            }
            return Err(e);
        }

        // Publish under the state lock so a concurrent close() either sees
        // the live handles or makes us discard them.
        let closed = {
            let state = self.state.lock();
            let closed = matches!(*state, InitState::Closed);
            if !closed {
                if transport.kind().needs_keepalive() {
                    self.start_keepalive(client.clone());
                }
                *self.live.lock() = Some(Live {
                    client: client.clone(),
                    transport: transport.clone(),
                });
            }
            closed
        };
        if closed {
            info!(server = %self.name, "Connection closed during initialization, discarding client");
            if let Err(e) = client.close().await {
                debug!(server = %self.name, error = %e, "Error closing MCP client");
            }
            if let Err(e) = transport.close().await {
                debug!(server = %self.name, error = %e, "Error closing transport");
            }
            return Err(SwitchyardError::Transport(format!(
                "<{}> connection closed during initialization",
                self.name
            )));
        }
        info!(server = %self.name, "Successfully initialized MCP client");
        Ok(())
    }

    fn start_keepalive(&self, client: Arc<McpClient>) {
        let name = self.name.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match tokio::time::timeout(KEEPALIVE_INTERVAL, client.ping()).await {
                    Ok(Ok(())) => debug!(server = %name, "MCP ping ok"),
                    Ok(Err(e)) => error!(server = %name, error = %e, "MCP ping failed"),
                    Err(_) => error!(server = %name, "MCP ping timed out"),
                }
            }
        });
        if let Some(previous) = self.keepalive.lock().replace(handle) {
            previous.abort();
        }
    }

    fn client(&self) -> SwitchyardResult<Arc<McpClient>> {
        self.live
            .lock()
            .as_ref()
            .map(|live| live.client.clone())
            .ok_or_else(|| SwitchyardError::Handshake(format!("<{}> client not initialized", self.name)))
    }

    /// Whether a listing should reach the downstream now. In deferred mode a
    /// connection that is not ready yet kicks off initialization and answers
    /// with an empty list.
    async fn ready_for_listing(self: &Arc<Self>) -> SwitchyardResult<bool> {
        if self.deferred.load(Ordering::SeqCst) && self.state() != ConnectionState::Ready {
            debug!(server = %self.name, "Listing before initialization finished");
            self.spawn_initialization();
            return Ok(false);
        }
        self.ensure_initialized().await?;
        if !self.in_group {
            info!(server = %self.name, "Server not in active group, returning empty list");
            return Ok(false);
        }
        Ok(true)
    }

    async fn bounded<T, F>(&self, operation: &str, call: F) -> Option<SwitchyardResult<T>>
    where
        F: Future<Output = SwitchyardResult<T>>,
    {
        let limit = self.config.timeout().unwrap_or(DEFAULT_LIST_TIMEOUT);
        match tokio::time::timeout(limit, call).await {
            Ok(result) => Some(result),
            Err(_) => {
                warn!(
                    server = %self.name,
                    operation,
                    timeout_ms = limit.as_millis() as u64,
                    "Listing timed out"
                );
                None
            }
        }
    }

    /// Filtered tool list, cached for the TTL.
    pub async fn list_tools(self: &Arc<Self>) -> SwitchyardResult<Vec<ToolDef>> {
        if !self.ready_for_listing().await? {
            return Ok(Vec::new());
        }
        if let Some(cached) = self.tools.get() {
            return Ok(cached);
        }
        let client = self.client()?;
        let Some(result) = self.bounded("listTools", client.list_tools()).await else {
            return Ok(Vec::new());
        };
        let tools = match &self.filter {
            Some(filter) => filter.apply(&self.name, result?),
            None => result?,
        };
        self.tools.put(tools.clone());
        Ok(tools)
    }

    /// Prompt list, cached for the TTL; `[]` when prompts are unsupported.
    pub async fn list_prompts(self: &Arc<Self>) -> SwitchyardResult<Vec<PromptDef>> {
        if !self.ready_for_listing().await? {
            return Ok(Vec::new());
        }
        if let Some(cached) = self.prompts.get() {
            return Ok(cached);
        }
        let client = self.client()?;
        match self.bounded("listPrompts", client.list_prompts()).await {
            None => Ok(Vec::new()),
            Some(Ok(prompts)) => {
                self.prompts.put(prompts.clone());
                Ok(prompts)
            }
            Some(Err(e)) if e.is_method_not_found() => {
                debug!(server = %self.name, "Prompts not supported");
                Ok(Vec::new())
            }
            Some(Err(e)) => Err(e),
        }
    }

    /// Resource list, cached for the TTL; `[]` when resources are unsupported.
    pub async fn list_resources(self: &Arc<Self>) -> SwitchyardResult<Vec<ResourceDef>> {
        if !self.ready_for_listing().await? {
            return Ok(Vec::new());
        }
        if let Some(cached) = self.resources.get() {
            return Ok(cached);
        }
        let client = self.client()?;
        match self.bounded("listResources", client.list_resources()).await {
            None => Ok(Vec::new()),
            Some(Ok(resources)) => {
                self.resources.put(resources.clone());
                Ok(resources)
            }
            Some(Err(e)) if e.is_method_not_found() => {
                debug!(server = %self.name, "Resources not supported");
                Ok(Vec::new())
            }
            Some(Err(e)) => Err(e),
        }
    }

    /// Forward `tools/call`, redacting the result when configured.
    pub async fn call_tool(self: &Arc<Self>, name: &str, arguments: Option<Value>) -> SwitchyardResult<Value> {
        self.ensure_initialized().await?;
        let result = self.client()?.call_tool(name, arguments).await?;
        Ok(self.redact_result(AuditOperation::ToolCall, result).await)
    }

    /// Forward `prompts/get`, redacting the result when configured.
    pub async fn get_prompt(self: &Arc<Self>, name: &str, arguments: Option<Value>) -> SwitchyardResult<Value> {
        self.ensure_initialized().await?;
        let result = self.client()?.get_prompt(name, arguments).await?;
        Ok(self.redact_result(AuditOperation::PromptCall, result).await)
    }

    /// Forward `resources/read`, redacting the result when configured.
    pub async fn read_resource(self: &Arc<Self>, uri: &str) -> SwitchyardResult<Value> {
        self.ensure_initialized().await?;
        let result = self.client()?.read_resource(uri).await?;
        Ok(self.redact_result(AuditOperation::ResourceCall, result).await)
    }

    async fn redact_result(&self, operation: AuditOperation, result: Value) -> Value {
        let Some(options) = self.config.options.active_redaction() else {
            return result;
        };
        let Some(redactor) = &self.deps.redactor else {
            return result;
        };
        if !redactor.is_available().await {
            return result;
        }

        let redacted = redactor.redact(&result, options);
        if options.verbose_audit {
            if let Some(audit) = &self.deps.audit {
                match audit
                    .record(&self.name, options, operation, &result, &redacted)
                    .await
                {
                    Ok(op_id) => debug!(server = %self.name, op_id = %op_id, "Redaction audited"),
                    Err(e) => error!(server = %self.name, error = %e, "Failed to write redaction audit"),
                }
            }
        }
        redacted
    }

    /// Stop keepalive, then close the client and transport. Errors are
    /// logged and swallowed. The connection cannot be used afterwards.
    pub async fn close(&self) {
        *self.state.lock() = InitState::Closed;
        if let Some(handle) = self.keepalive.lock().take() {
            handle.abort();
        }
        let live = self.live.lock().take();
        if let Some(live) = live {
            if let Err(e) = live.client.close().await {
                debug!(server = %self.name, error = %e, "Error closing MCP client");
            }
            if let Err(e) = live.transport.close().await {
                debug!(server = %self.name, error = %e, "Error closing transport");
            }
        }
        self.tools.clear();
        self.prompts.clear();
        self.resources.clear();
    }

    /// True while a keepalive task is scheduled.
    pub fn has_keepalive(&self) -> bool {
        self.keepalive
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}
