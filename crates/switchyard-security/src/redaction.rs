use crate::matcher::Matcher;
use crate::scanner::redact_generic;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::PathBuf;
use switchyard_core::{RedactionOptions, SwitchyardError, SwitchyardResult};
use tokio::sync::OnceCell;
use tracing::{error, info};

/// Transform applied to downstream results before they reach the client.
#[async_trait]
pub trait Redactor: Send + Sync {
    /// Load whatever the redactor needs. Repeated calls return the outcome of
    /// the first one.
    async fn initialize(&self) -> SwitchyardResult<()>;

    /// True once initialization has succeeded.
    async fn is_available(&self) -> bool;

    /// Redact `payload` according to `options`. Returns the payload unchanged
    /// when the redactor is not ready.
    fn redact(&self, payload: &Value, options: &RedactionOptions) -> Value;
}

enum Source {
    Files(Vec<PathBuf>),
    Terms(Vec<String>),
}

/// Redactor combining the generic email/phone scanner with a dictionary of
/// sensitive terms loaded from newline-separated files.
pub struct DictionaryRedactor {
    source: Source,
    matcher: OnceCell<Result<Matcher, String>>,
}

impl DictionaryRedactor {
    /// Redactor whose dictionary is read from `paths` on first use.
    pub fn from_files(paths: Vec<PathBuf>) -> Self {
        Self {
            source: Source::Files(paths),
            matcher: OnceCell::new(),
        }
    }

    /// Redactor with an in-memory dictionary.
    pub fn from_terms<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            source: Source::Terms(terms.into_iter().map(Into::into).collect()),
            matcher: OnceCell::new(),
        }
    }

    async fn load_dictionary(&self) -> SwitchyardResult<Vec<String>> {
        match &self.source {
            Source::Terms(terms) => Ok(terms.clone()),
            Source::Files(paths) => {
                if paths.is_empty() {
                    return Err(SwitchyardError::Redaction(
                        "No dictionary files configured".into(),
                    ));
                }
                let mut terms = Vec::new();
                for path in paths {
                    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
                        SwitchyardError::Redaction(format!(
                            "Failed to read dictionary {}: {e}",
                            path.display()
                        ))
                    })?;
                    terms.extend(
                        text.lines()
                            .map(str::trim)
                            .filter(|l| !l.is_empty())
                            .map(String::from),
                    );
                }
                Ok(terms)
            }
        }
    }

    async fn build_matcher(&self) -> Result<Matcher, String> {
        let dictionary = self.load_dictionary().await.map_err(|e| e.to_string())?;
        let count = dictionary.len();
        match Matcher::build(dictionary) {
            Ok(matcher) => {
                info!(terms = count, "Redaction service initialized");
                Ok(matcher)
            }
            Err(e) => Err(e.to_string()),
        }
    }

    fn redact_string(matcher: &Matcher, text: &str) -> Value {
        Value::String(matcher.redact(&redact_generic(text)))
    }

    fn redact_all(matcher: &Matcher, value: &Value) -> Value {
        match value {
            Value::String(s) => Self::redact_string(matcher, s),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| Self::redact_all(matcher, v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::redact_all(matcher, v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    // Strings outside matching keys are still scanned when they are reached
    // directly (top-level string or array element).
    fn redact_keys(matcher: &Matcher, value: &Value, keys: &HashSet<&str>) -> Value {
        match value {
            Value::String(s) => Self::redact_string(matcher, s),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| Self::redact_keys(matcher, v, keys))
                    .collect(),
            ),
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (k, v) in map {
                    let redacted = if keys.contains(k.as_str()) {
                        Self::redact_all(matcher, v)
                    } else {
                        Self::redact_keys(matcher, v, keys)
                    };
                    out.insert(k.clone(), redacted);
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }
}

#[async_trait]
impl Redactor for DictionaryRedactor {
    async fn initialize(&self) -> SwitchyardResult<()> {
        let outcome = self.matcher.get_or_init(|| self.build_matcher()).await;
        match outcome {
            Ok(_) => Ok(()),
            Err(msg) => {
                error!(error = %msg, "Redaction service init failed");
                Err(SwitchyardError::Redaction(msg.clone()))
            }
        }
    }

    async fn is_available(&self) -> bool {
        self.initialize().await.is_ok()
    }

    fn redact(&self, payload: &Value, options: &RedactionOptions) -> Value {
        let Some(Ok(matcher)) = self.matcher.get() else {
            return payload.clone();
        };
        if !options.enabled {
            return payload.clone();
        }
        if options.keys.is_empty() {
            Self::redact_all(matcher, payload)
        } else {
            let keys: HashSet<&str> = options.keys.iter().map(String::as_str).collect();
            Self::redact_keys(matcher, payload, &keys)
        }
    }
}
