use async_trait::async_trait;
use drover_core::{Message, Result, Role, Tool, ToolCall};
use serde::{Deserialize, Serialize};

/// Everything a provider needs for one completion.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// The model to use, e.g. "anthropic/claude-sonnet-4-20250514".
    pub model: String,
    /// Conversation history, oldest first.
    pub messages: Vec<Message>,
    /// Tools advertised to the model.
    pub tools: Vec<Tool>,
    /// Sent out of band from `messages`.
    pub system: Option<String>,
    /// Output budget.
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
}

impl LlmRequest {
    /// A one-shot, tool-less request. Used for side calls such as
    /// summarization and judging.
    pub fn single_prompt(
        model: impl Into<String>,
        system: impl Into<String>,
        prompt: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            model: model.into(),
            messages: vec![Message::text(0, Role::User, prompt)],
            tools: vec![],
            system: Some(system.into()),
            max_tokens,
            temperature: 0.0,
            stream: false,
        }
    }
}

/// The result of [`LlmProvider::complete`].
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub message: Message,
    pub usage: Usage,
    /// True when `message` requests at least one tool call.
    pub has_tool_calls: bool,
    pub stop_reason: StopReason,
}

impl LlmResponse {
    pub fn text(&self) -> String {
        self.message.text_content()
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.message.tool_calls
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    /// Output was cut off at the token limit ("length").
    MaxTokens,
    StopSequence,
    ContentFilter,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::EndTurn => "end_turn",
            StopReason::ToolUse => "tool_use",
            StopReason::MaxTokens => "length",
            StopReason::StopSequence => "stop_sequence",
            StopReason::ContentFilter => "content_filter",
        }
    }
}

/// One item of a streamed completion. A well-formed stream ends with `Done`.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    TextDelta(String),
    /// A fully assembled tool call.
    ToolCall(ToolCall),
    Usage(Usage),
    Done(StopReason),
    /// A failure after streaming started.
    Error(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    pub fn merge(&mut self, other: &Usage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

/// The completion backend. Concrete HTTP providers live outside this workspace.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;

    /// Failures before the first chunk come back as `Err`, later ones as
    /// [`StreamChunk::Error`].
    async fn stream(&self, request: &LlmRequest) -> Result<tokio::sync::mpsc::Receiver<StreamChunk>>;
}
