use crate::protocol::ToolDef;
use std::collections::HashSet;
use switchyard_core::ToolFilterConfig;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Allow,
    Block,
    Unknown,
}

/// Allow/block list applied to a downstream's tools before they are cached.
#[derive(Debug, Clone)]
pub struct ToolFilter {
    mode: Mode,
    raw_mode: String,
    names: HashSet<String>,
}

impl ToolFilter {
    /// `None` when there is nothing to filter (no config or an empty list).
    pub fn from_config(config: Option<&ToolFilterConfig>) -> Option<Self> {
        let config = config.filter(|c| !c.list.is_empty())?;
        let raw_mode = config
            .mode
            .as_deref()
            .unwrap_or("block")
            .trim()
            .to_lowercase();
        let mode = match raw_mode.as_str() {
            "allow" => Mode::Allow,
            "block" => Mode::Block,
            _ => Mode::Unknown,
        };
        Some(Self {
            mode,
            raw_mode,
            names: config.list.iter().cloned().collect(),
        })
    }

    /// True when `tool` should be hidden from callers.
    pub fn is_filtered(&self, server: &str, tool: &str) -> bool {
        match self.mode {
            Mode::Allow if !self.names.contains(tool) => {
                info!(server, tool, "Ignoring tool not in allow list");
                true
            }
            Mode::Block if self.names.contains(tool) => {
                info!(server, tool, "Ignoring tool in block list");
                true
            }
            Mode::Unknown => {
                warn!(server, mode = %self.raw_mode, "Unknown tool filter mode");
                false
            }
            _ => false,
        }
    }

    pub fn apply(&self, server: &str, tools: Vec<ToolDef>) -> Vec<ToolDef> {
        tools
            .into_iter()
            .filter(|t| !self.is_filtered(server, &t.name))
            .collect()
    }
}
