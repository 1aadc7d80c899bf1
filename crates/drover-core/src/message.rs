use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::SessionId;
use crate::tool::{ToolCall, ToolResult};

/// A message in a conversation. Immutable once appended to a [`crate::Session`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub session_id: SessionId,
    pub role: Role,
    pub content: Vec<MessageContent>,
    pub timestamp: DateTime<Utc>,
    /// Tool calls requested by the assistant in this message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on synthetic messages injected by the runtime (continue nudges, summaries).
    #[serde(default)]
    pub synthetic: bool,
}

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool",
        }
    }
}

/// A single content block within a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
    },
}

impl Message {
    pub fn text(session_id: SessionId, role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            role,
            content: vec![MessageContent::Text { text: text.into() }],
            timestamp: Utc::now(),
            tool_calls: vec![],
            synthetic: false,
        }
    }

    /// Create an assistant message carrying generated text and requested tool calls.
    pub fn assistant(session_id: SessionId, text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let text = text.into();
        let mut msg = Self::text(session_id, Role::Assistant, "");
        msg.content = if text.is_empty() {
            vec![]
        } else {
            vec![MessageContent::Text { text }]
        };
        msg.tool_calls = tool_calls;
        msg
    }

    /// Create a tool-result message answering the call `result.tool_call_id`.
    pub fn tool_result(session_id: SessionId, tool_name: &str, result: &ToolResult) -> Self {
        let mut msg = Self::text(session_id, Role::Tool, "");
        msg.content = vec![MessageContent::ToolResult {
            tool_call_id: result.tool_call_id.clone(),
            tool_name: tool_name.to_string(),
            content: result.content.clone(),
            is_error: result.is_error,
        }];
        msg
    }

    /// Mark this message as injected by the runtime rather than a human or the model.
    pub fn synthetic(mut self) -> Self {
        self.synthetic = true;
        self
    }

    /// Every text and tool-result block, newline separated.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                MessageContent::Text { text } => text.as_str(),
                MessageContent::ToolResult { content, .. } => content.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The id of the tool call this message answers, if it is a tool result.
    pub fn tool_call_id(&self) -> Option<&str> {
        self.content.iter().find_map(|c| match c {
            MessageContent::ToolResult { tool_call_id, .. } => Some(tool_call_id.as_str()),
            _ => None,
        })
    }

    /// Rough token count at four bytes per token, counting tool call
    /// arguments and tool result bodies.
    pub fn estimate_tokens(&self) -> usize {
        // role markers
        let mut chars = 16usize;

        for block in &self.content {
            match block {
                MessageContent::Text { text } => chars += text.len(),
                MessageContent::ToolResult {
                    content,
                    tool_call_id,
                    tool_name,
                    ..
                } => {
                    chars += content.len() + tool_call_id.len() + tool_name.len();
                }
            }
        }

        for tc in &self.tool_calls {
            chars += tc.tool_name.len();
            chars += tc.id.len();
            chars += tc.arguments.to_string().len();
        }

        (chars / 4).max(1)
    }
}

/// Estimate the token count of a whole history plus an optional system prompt.
pub fn estimate_history_tokens(messages: &[Message], system_prompt: Option<&str>) -> usize {
    let system = system_prompt.map(|s| s.len() / 4).unwrap_or(0);
    system + messages.iter().map(Message::estimate_tokens).sum::<usize>()
}
