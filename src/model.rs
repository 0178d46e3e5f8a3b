//! Request and result types shared by the resolver, engine and transport.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Title used when the request context carries no `language_title`.
pub const DEFAULT_LANGUAGE_TITLE: &str = "default";

/// One unit of work submitted to `/execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Caller-assigned correlation id.
    pub request_id: String,

    /// Input to the executed code.
    pub params: Map<String, Value>,

    /// Call-site metadata; may contain `language_title`.
    pub context: Map<String, Value>,

    /// Inline source; takes precedence over every other strategy.
    #[serde(default)]
    pub script_content: Option<String>,
}

impl ExecutionRequest {
    /// Build a request with empty params/context and no inline script.
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            params: Map::new(),
            context: Map::new(),
            script_content: None,
        }
    }

    /// Set the inline script.
    #[must_use]
    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script_content = Some(script.into());
        self
    }

    /// Insert a parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Insert a context entry.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Inline script, if present and non-empty.
    pub fn inline_script(&self) -> Option<&str> {
        self.script_content.as_deref().filter(|s| !s.is_empty())
    }

    /// `context.language_title`, or `"default"` when absent or not a string.
    pub fn language_title(&self) -> &str {
        self.context
            .get("language_title")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_LANGUAGE_TITLE)
    }

    /// `params` as a JSON value.
    pub fn params_value(&self) -> Value {
        Value::Object(self.params.clone())
    }

    /// `context` as a JSON value.
    pub fn context_value(&self) -> Value {
        Value::Object(self.context.clone())
    }
}

/// Outcome returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub result: Value,
    pub execution_time_ms: u64,
    pub memory_usage_bytes: Option<u64>,
}

/// Output written by the executed code. Logged, never returned to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

/// A completed execution: the caller-visible result plus captured output.
#[derive(Debug, Clone)]
pub struct Execution {
    pub result: ExecutionResult,
    pub output: CapturedOutput,
}
