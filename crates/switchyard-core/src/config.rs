use crate::error::{SwitchyardError, SwitchyardResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

/// How the proxy talks to a downstream MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Spawned child process speaking newline-delimited JSON-RPC on stdio.
    Stdio,
    /// Server-sent event stream plus a POST endpoint announced by the server.
    Sse,
    /// Stateful streamable HTTP keyed by `mcp-session-id`.
    StreamableHttp,
}

impl TransportKind {
    /// Whether connections of this kind need a periodic ping to stay alive.
    pub fn needs_keepalive(self) -> bool {
        !matches!(self, TransportKind::Stdio)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::Sse => write!(f, "sse"),
            TransportKind::StreamableHttp => write!(f, "streamable-http"),
        }
    }
}

/// How the proxy exposes its virtual servers to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServeMode {
    /// `GET /{name}/sse` + `POST /{name}/message`.
    Sse,
    /// `ANY /{name}` with `mcp-session-id` sessions.
    #[default]
    StreamableHttp,
    /// One downstream over the process's own stdin/stdout.
    Stdio,
}

/// Allow/block list applied to a downstream's tool list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolFilterConfig {
    /// `allow` or `block` (case-insensitive). Unset means `block`.
    #[serde(default)]
    pub mode: Option<String>,
    /// Tool names the mode applies to.
    #[serde(default)]
    pub list: Vec<String>,
}

/// Response redaction settings for one downstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactionOptions {
    /// Redact invocation results before returning them.
    #[serde(default)]
    pub enabled: bool,
    /// Only redact values under these object keys. Empty redacts every string.
    #[serde(default)]
    pub keys: Vec<String>,
    /// Write pre/post redaction payloads to the audit directory.
    #[serde(default)]
    pub verbose_audit: bool,
}

/// Options bag shared by the proxy section and every downstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyOptions {
    /// Abort startup when this downstream fails to initialize.
    #[serde(default)]
    pub panic_if_invalid: Option<bool>,
    /// Log every inbound request addressed to this downstream.
    #[serde(default)]
    pub log_enabled: Option<bool>,
    /// Accepted bearer tokens. Unset or empty disables auth.
    #[serde(default)]
    pub auth_tokens: Option<Vec<String>>,
    /// Tool allow/block list.
    #[serde(default)]
    pub tool_filter: Option<ToolFilterConfig>,
    /// Response redaction.
    #[serde(default)]
    pub redaction: Option<RedactionOptions>,
}

impl ProxyOptions {
    /// Resolved `panicIfInvalid` flag.
    pub fn panic_if_invalid(&self) -> bool {
        self.panic_if_invalid.unwrap_or(false)
    }

    /// Resolved `logEnabled` flag.
    pub fn log_enabled(&self) -> bool {
        self.log_enabled.unwrap_or(false)
    }

    /// Configured bearer tokens, empty when auth is disabled.
    pub fn auth_tokens(&self) -> &[String] {
        self.auth_tokens.as_deref().unwrap_or_default()
    }

    /// The redaction options, but only when redaction is switched on.
    pub fn active_redaction(&self) -> Option<&RedactionOptions> {
        self.redaction.as_ref().filter(|r| r.enabled)
    }

    /// Fill unset inheritable fields from the proxy-level options.
    ///
    /// `redaction` and `toolFilter` are never inherited.
    fn inherit_from(&mut self, parent: &ProxyOptions) {
        if self.auth_tokens.is_none() {
            self.auth_tokens.clone_from(&parent.auth_tokens);
        }
        if self.panic_if_invalid.is_none() {
            self.panic_if_invalid = parent.panic_if_invalid;
        }
        if self.log_enabled.is_none() {
            self.log_enabled = parent.log_enabled;
        }
    }
}

/// Connection parameters and options for one downstream MCP server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownstreamConfig {
    /// Explicit transport. Inferred from `command` / `url` when unset.
    #[serde(default)]
    pub transport_type: Option<TransportKind>,
    /// Executable for the stdio transport.
    #[serde(default)]
    pub command: Option<String>,
    /// Arguments for the stdio transport.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for the stdio transport, merged over the parent's.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Target address for the SSE and streamable HTTP transports.
    #[serde(default)]
    pub url: Option<String>,
    /// Extra headers sent to HTTP based downstreams.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Capability listing timeout in milliseconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Per-downstream options.
    #[serde(default)]
    pub options: ProxyOptions,
}

impl DownstreamConfig {
    /// Resolve the transport kind: explicit wins, then `command` ⇒ stdio,
    /// then `url` ⇒ SSE.
    pub fn resolve_transport_kind(&self) -> SwitchyardResult<TransportKind> {
        if let Some(kind) = self.transport_type {
            return Ok(kind);
        }
        if self.command.is_some() {
            return Ok(TransportKind::Stdio);
        }
        if self.url.is_some() {
            return Ok(TransportKind::Sse);
        }
        Err(SwitchyardError::Config(
            "Cannot infer transport type: neither command nor url is set".into(),
        ))
    }

    /// Configured listing timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.filter(|ms| *ms > 0).map(Duration::from_millis)
    }
}

fn default_addr() -> String {
    ":8083".to_string()
}

fn default_proxy_name() -> String {
    "switchyard".to_string()
}

fn default_proxy_version() -> String {
    "1.0.0".to_string()
}

/// The `mcpProxy` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Public base URL. Informational; SSE endpoints are derived per request.
    #[serde(default, rename = "baseURL")]
    pub base_url: String,
    /// Listen address, `":8083"` or `"127.0.0.1:8083"`.
    #[serde(default = "default_addr")]
    pub addr: String,
    /// Proxy name reported in logs.
    #[serde(default = "default_proxy_name")]
    pub name: String,
    /// Proxy version reported in logs.
    #[serde(default = "default_proxy_version")]
    pub version: String,
    /// Serving mode. Defaults to streamable HTTP.
    #[serde(default, rename = "type")]
    pub serve_mode: Option<ServeMode>,
    /// Options inherited by downstreams.
    #[serde(default)]
    pub options: ProxyOptions,
}

impl ProxySettings {
    /// Serving mode with the default applied.
    pub fn serve_mode(&self) -> ServeMode {
        self.serve_mode.unwrap_or_default()
    }

    /// Socket address to bind, expanding a bare `":port"`.
    pub fn bind_addr(&self) -> String {
        if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else if self.addr.is_empty() {
            format!("0.0.0.0{}", default_addr())
        } else {
            self.addr.clone()
        }
    }
}

fn default_audit_dir() -> PathBuf {
    PathBuf::from("redaction_audit")
}

/// Where the redaction collaborator loads its dictionary and writes audits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactionSettings {
    /// Newline-delimited term files (names, emails, ...).
    #[serde(default)]
    pub dictionary_paths: Vec<PathBuf>,
    /// Root directory for verbose audit output.
    #[serde(default = "default_audit_dir")]
    pub audit_dir: PathBuf,
}

impl Default for RedactionSettings {
    fn default() -> Self {
        Self {
            dictionary_paths: Vec::new(),
            audit_dir: default_audit_dir(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    #[serde(default)]
    mcp_proxy: Option<ProxySettings>,
    #[serde(default)]
    mcp_servers: BTreeMap<String, DownstreamConfig>,
    #[serde(default)]
    groups: HashMap<String, Vec<String>>,
    #[serde(default)]
    redaction: RedactionSettings,
}

/// Fully normalized proxy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// The `mcpProxy` section.
    pub proxy: ProxySettings,
    /// Downstreams by name.
    pub mcp_servers: BTreeMap<String, DownstreamConfig>,
    /// Named groups of downstreams.
    pub groups: HashMap<String, Vec<String>>,
    /// Redaction dictionary and audit locations.
    pub redaction: RedactionSettings,
}

impl Config {
    /// Parse and normalize a JSON document, expanding `${VAR}` in headers
    /// from the process environment.
    pub fn from_json_str(input: &str) -> SwitchyardResult<Self> {
        let raw: RawConfig = serde_json::from_str(input)?;
        Self::normalize(raw, |name| std::env::var(name).ok())
    }

    /// Parse and normalize a TOML document.
    pub fn from_toml_str(input: &str) -> SwitchyardResult<Self> {
        let raw: RawConfig = toml::from_str(input)
            .map_err(|e| SwitchyardError::Config(format!("Invalid TOML config: {e}")))?;
        Self::normalize(raw, |name| std::env::var(name).ok())
    }

    /// Parse JSON with a custom environment lookup.
    pub fn from_json_str_with_env<F>(input: &str, lookup: F) -> SwitchyardResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = serde_json::from_str(input)?;
        Self::normalize(raw, lookup)
    }

    fn normalize<F>(raw: RawConfig, lookup: F) -> SwitchyardResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut proxy = raw
            .mcp_proxy
            .ok_or_else(|| SwitchyardError::Config("mcpProxy is required".into()))?;
        if proxy.serve_mode.is_none() {
            proxy.serve_mode = Some(ServeMode::default());
        }

        let mut mcp_servers = raw.mcp_servers;
        for downstream in mcp_servers.values_mut() {
            for (key, value) in downstream.headers.iter_mut() {
                *value = expand_env_vars(key, value, &lookup)?;
            }
            downstream.options.inherit_from(&proxy.options);
        }

        Ok(Self {
            proxy,
            mcp_servers,
            groups: raw.groups,
            redaction: raw.redaction,
        })
    }

    /// Names of all configured downstreams, in sorted order.
    pub fn server_names(&self) -> Vec<&str> {
        self.mcp_servers.keys().map(String::as_str).collect()
    }

    /// Pick the single downstream served in stdio mode: the explicit target,
    /// or the only configured downstream.
    pub fn stdio_target(&self, explicit: Option<&str>) -> SwitchyardResult<String> {
        match explicit {
            Some(name) if self.mcp_servers.contains_key(name) => Ok(name.to_string()),
            Some(name) => Err(SwitchyardError::Config(format!(
                "Downstream server \"{name}\" not found"
            ))),
            None if self.mcp_servers.len() == 1 => Ok(self
                .mcp_servers
                .keys()
                .next()
                .cloned()
                .unwrap_or_default()),
            None => Err(SwitchyardError::Config(
                "In stdio mode, you must specify exactly one downstream or pass --stdio-target <name>"
                    .into(),
            )),
        }
    }
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap_or_else(|_| unreachable!())
    })
}

/// Expand `${VAR}` references in a header value. An unset variable is a
/// configuration error naming both the variable and the header.
fn expand_env_vars<F>(header: &str, value: &str, lookup: &F) -> SwitchyardResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    let pattern = env_var_pattern();
    let mut out = String::with_capacity(value.len());
    let mut last = 0;
    for caps in pattern.captures_iter(value) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let resolved = lookup(name.as_str()).ok_or_else(|| {
            SwitchyardError::Config(format!(
                "Environment variable {} referenced in header {header} is not set",
                name.as_str()
            ))
        })?;
        out.push_str(&value[last..whole.start()]);
        out.push_str(&resolved);
        last = whole.end();
    }
    out.push_str(&value[last..]);
    Ok(out)
}

/// Resolved group membership. With no active group every downstream is in.
#[derive(Debug, Clone, Default)]
pub struct ActiveGroup {
    name: Option<String>,
    members: Option<HashSet<String>>,
}

impl ActiveGroup {
    /// Every downstream is active.
    pub fn all() -> Self {
        Self::default()
    }

    /// Resolve a requested group against the configuration. Unknown groups
    /// fall back to "all servers active" with a warning.
    pub fn resolve(config: &Config, requested: Option<&str>) -> Self {
        let Some(name) = requested else {
            return Self::all();
        };
        match config.groups.get(name) {
            Some(members) => Self {
                name: Some(name.to_string()),
                members: Some(members.iter().cloned().collect()),
            },
            None => {
                warn!(
                    group = %name,
                    "Group not found in configuration, all servers enabled"
                );
                Self::all()
            }
        }
    }

    /// Name of the active group, if one is in effect.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether a downstream belongs to the active group.
    pub fn contains(&self, server: &str) -> bool {
        self.members.as_ref().map_or(true, |m| m.contains(server))
    }
}
