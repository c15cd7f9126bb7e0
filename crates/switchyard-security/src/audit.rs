use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use switchyard_core::{RedactionOptions, SwitchyardResult};
use tracing::{debug, error};
use uuid::Uuid;

/// Kind of invocation an audit record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOperation {
    ToolCall,
    PromptCall,
    ResourceCall,
}

impl AuditOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditOperation::ToolCall => "tool_call",
            AuditOperation::PromptCall => "prompt_call",
            AuditOperation::ResourceCall => "resource_call",
        }
    }
}

impl fmt::Display for AuditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records the payload of an invocation before and after redaction.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record one operation for `client`. Returns the operation id, or an
    /// empty string when `options` does not ask for a verbose audit.
    async fn record(
        &self,
        client: &str,
        options: &RedactionOptions,
        operation: AuditOperation,
        before: &Value,
        after: &Value,
    ) -> SwitchyardResult<String>;
}

/// Audit sink writing one pretty-printed JSON file per side of each
/// operation under `<root>/<client>/`.
#[derive(Debug, Clone)]
pub struct FileAuditSink {
    root: PathBuf,
}

impl FileAuditSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn write_json(path: &Path, data: &Value) {
        let rendered = match serde_json::to_string_pretty(&expand_embedded_json(data)) {
            Ok(s) => s,
            Err(e) => {
                error!(file = %path.display(), error = %e, "Failed to render audit file");
                return;
            }
        };
        if let Err(e) = tokio::fs::write(path, rendered).await {
            error!(file = %path.display(), error = %e, "Failed to write audit file");
        }
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn record(
        &self,
        client: &str,
        options: &RedactionOptions,
        operation: AuditOperation,
        before: &Value,
        after: &Value,
    ) -> SwitchyardResult<String> {
        if !options.verbose_audit {
            return Ok(String::new());
        }

        let dir = self.root.join(client);
        tokio::fs::create_dir_all(&dir).await?;

        let op_id = Uuid::new_v4().to_string();
        let timestamp = Utc::now()
            .format("%Y-%m-%dT%H-%M-%S-%3fZ")
            .to_string();
        let stem = format!("{timestamp}-{op_id}-{operation}");

        Self::write_json(&dir.join(format!("{stem}-pre.json")), before).await;
        Self::write_json(&dir.join(format!("{stem}-post.json")), after).await;

        debug!(client, op_id = %op_id, operation = %operation, "Audit record written");
        Ok(op_id)
    }
}

/// Strings that hold JSON documents are parsed so the audit file shows their
/// structure instead of an escaped blob.
fn expand_embedded_json(value: &Value) -> Value {
    match value {
        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| value.clone()),
        Value::Array(items) => Value::Array(items.iter().map(expand_embedded_json).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand_embedded_json(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_names() {
        assert_eq!(AuditOperation::ToolCall.as_str(), "tool_call");
        assert_eq!(AuditOperation::PromptCall.to_string(), "prompt_call");
        assert_eq!(AuditOperation::ResourceCall.as_str(), "resource_call");
    }

    #[test]
    fn test_embedded_json_expanded() {
        let v = json!({"text": "{\"a\":1}", "plain": "hello", "n": 2});
        assert_eq!(
            expand_embedded_json(&v),
            json!({"text": {"a": 1}, "plain": "hello", "n": 2})
        );
    }

    #[tokio::test]
    async fn test_non_verbose_records_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileAuditSink::new(dir.path());
        let id = sink
            .record(
                "github",
                &RedactionOptions::default(),
                AuditOperation::ToolCall,
                &json!({}),
                &json!({}),
            )
            .await
            .unwrap();
        assert!(id.is_empty());
        assert!(!dir.path().join("github").exists());
    }
}
