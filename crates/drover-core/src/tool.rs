use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::AuthScope;

/// Description of a tool that can be called by the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Unique name, e.g. "read_file", "run_command", "web_fetch".
    pub name: String,
    /// Human-readable description for the LLM.
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: Value,
    /// Whether this tool has side-effects (write vs read).
    #[serde(default)]
    pub is_mutating: bool,
}

/// A request from the LLM to call a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub tool_name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            arguments,
        }
    }

    /// Typed view over the call's argument object.
    pub fn args(&self) -> ToolArgs<'_> {
        ToolArgs::new(&self.arguments)
    }

    /// Stable `name(args)` signature used for repetition detection.
    pub fn signature(&self) -> String {
        format!("{}({})", self.tool_name, self.arguments)
    }
}

/// The result of executing a tool call. `tool_call_id` always matches the originating call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
    /// Optional structured data returned alongside the text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// The call was stopped because a human has to approve it first.
    #[serde(default)]
    pub requires_user_input: bool,
    /// Grant that would satisfy future checks if the user approves "always".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_scope: Option<AuthScope>,
}

impl ToolResult {
    pub fn success(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: false,
            data: None,
            requires_user_input: false,
            suggested_scope: None,
        }
    }

    pub fn error(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::success(tool_call_id, content)
        }
    }

    /// An error result asking the caller to obtain user approval.
    pub fn needs_approval(
        tool_call_id: impl Into<String>,
        reason: impl Into<String>,
        suggested_scope: Option<AuthScope>,
    ) -> Self {
        Self {
            requires_user_input: true,
            suggested_scope,
            ..Self::error(tool_call_id, reason)
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Trait implemented by anything that can execute tool calls (the tool registry).
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// List all tools this executor provides, for advertising to the model.
    fn tools(&self) -> Vec<Tool>;

    /// Execute a single tool call and return the result.
    async fn execute(&self, call: &ToolCall) -> crate::Result<ToolResult>;
}

/// Typed accessors over an untyped JSON argument object.
/// Missing keys and wrong types fall back to the supplied default.
#[derive(Debug, Clone, Copy)]
pub struct ToolArgs<'a> {
    value: &'a Value,
}

impl<'a> ToolArgs<'a> {
    pub fn new(value: &'a Value) -> Self {
        Self { value }
    }

    pub fn str(&self, key: &str) -> Option<&'a str> {
        self.value.get(key).and_then(Value::as_str)
    }

    /// First present string among several accepted key spellings.
    pub fn first_str(&self, keys: &[&str]) -> Option<&'a str> {
        keys.iter().find_map(|k| self.str(k))
    }

    pub fn string_or(&self, key: &str, default: &str) -> String {
        self.str(key).unwrap_or(default).to_string()
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.value.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn u64_or(&self, key: &str, default: u64) -> u64 {
        self.value.get(key).and_then(Value::as_u64).unwrap_or(default)
    }

    pub fn path(&self, keys: &[&str]) -> Option<PathBuf> {
        self.first_str(keys)
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
    }
}
