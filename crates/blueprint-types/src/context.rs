use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Well-known context slots written by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKey {
    OriginalInput,
    ParsedDescription,
    GeneratedArtifact,
}

impl ContextKey {
    pub fn as_str(self) -> &'static str {
        match self {
            ContextKey::OriginalInput => "original_input",
            ContextKey::ParsedDescription => "parsed_description",
            ContextKey::GeneratedArtifact => "generated_artifact",
        }
    }
}

/// Key-value store of cross-step artifacts for a single run.
///
/// A context is created fresh per run and owned by the engine for the run's
/// lifetime. Steps execute strictly in sequence, so it needs no locking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    values: HashMap<String, serde_json::Value>,
    logs: Vec<String>,
}

impl ExecutionContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a key.
    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.values.insert(key.into(), value);
    }

    /// Read a value by key.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// Read a value as a string slice, `None` when absent or not a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_str())
    }

    /// Convenience accessor that returns a `String`. Falls back to `default`
    /// when the key is absent or not a JSON string.
    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.get_str(key).unwrap_or(default).to_owned()
    }

    /// Store a well-known artifact.
    pub fn set_artifact(&mut self, key: ContextKey, content: impl Into<String>) {
        self.set(key.as_str(), serde_json::Value::String(content.into()));
    }

    /// Read a well-known artifact.
    pub fn artifact(&self, key: ContextKey) -> Option<&str> {
        self.get_str(key.as_str())
    }

    /// Append a free-form log entry.
    pub fn append_log(&mut self, entry: impl Into<String>) {
        self.logs.push(entry.into());
    }

    pub fn logs(&self) -> &[String] {
        &self.logs
    }
}
