//! Scripted provider for tests: queued responses come back in order and every
//! request is recorded.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::provider::*;
use drover_core::{DroverError, Message, Result, ToolCall};

/// Replays queued [`MockResponse`]s, then a placeholder text.
///
/// # Example
/// ```
/// use drover_llm::MockProvider;
/// let provider = MockProvider::new("test")
///     .with_response("Hello, world!");
/// ```
pub struct MockProvider {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    /// Every request received, for assertions in tests.
    requests: Arc<Mutex<Vec<LlmRequest>>>,
    name: String,
}

/// One scripted reply.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub text: String,
    /// Explicit stream chunks. When empty, `text` is streamed word by word.
    pub chunks: Vec<String>,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub usage: Usage,
    /// If set, the provider fails with this message instead of responding.
    pub error: Option<String>,
    /// Artificial latency before the response (or error) is produced.
    pub delay: Option<Duration>,
    /// Sent as [`StreamChunk::Error`] after the text, in place of `Done`.
    pub stream_error: Option<String>,
    /// Close the stream after the text without a `Done` chunk.
    pub truncated: bool,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            text: String::new(),
            chunks: vec![],
            tool_calls: vec![],
            stop_reason: StopReason::EndTurn,
            usage: Usage {
                input_tokens: 100,
                output_tokens: 50,
            },
            error: None,
            delay: None,
            stream_error: None,
            truncated: false,
        }
    }
}

impl MockResponse {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }

    pub fn error(msg: &str) -> Self {
        Self {
            error: Some(msg.to_string()),
            ..Default::default()
        }
    }

    /// A text response streamed exactly as the given chunks.
    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let chunks: Vec<String> = chunks.into_iter().map(Into::into).collect();
        Self {
            text: chunks.concat(),
            chunks,
            ..Default::default()
        }
    }

    pub fn with_stop_reason(mut self, stop_reason: StopReason) -> Self {
        self.stop_reason = stop_reason;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Stream the text, then fail mid-stream with `error`.
    pub fn failing_mid_stream(mut self, error: &str) -> Self {
        self.stream_error = Some(error.to_string());
        self
    }

    /// Stream the text, then drop the connection.
    pub fn truncated(mut self) -> Self {
        self.truncated = true;
        self
    }

    fn stream_pieces(&self) -> Vec<String> {
        if !self.chunks.is_empty() {
            return self.chunks.clone();
        }
        self.text
            .split_whitespace()
            .map(|word| format!("{word} "))
            .collect()
    }
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(vec![])),
            name: name.into(),
        }
    }

    pub fn with_response(self, text: &str) -> Self {
        self.with_mock_response(MockResponse::text(text))
    }

    /// A reply requesting one tool call with a fresh `call_` id.
    pub fn with_tool_call(self, name: &str, args: serde_json::Value) -> Self {
        let call = ToolCall::new(format!("call_{}", uuid::Uuid::new_v4()), name, args);
        self.with_tool_calls(vec![call])
    }

    /// Queue a response requesting several tool calls at once.
    pub fn with_tool_calls(self, calls: Vec<ToolCall>) -> Self {
        self.with_mock_response(MockResponse {
            tool_calls: calls,
            stop_reason: StopReason::ToolUse,
            ..Default::default()
        })
    }

    /// Fail the next request with this provider error text.
    pub fn with_error(self, error: &str) -> Self {
        self.with_mock_response(MockResponse::error(error))
    }

    pub fn with_mock_response(self, resp: MockResponse) -> Self {
        self.responses.lock().push_back(resp);
        self
    }

    /// Queue a response through a shared reference.
    pub fn queue_response(&self, resp: MockResponse) {
        self.responses.lock().push_back(resp);
    }

    /// Snapshot of all requests made to this provider so far.
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }

    /// Pop the next queued response, or a placeholder once the queue is drained.
    async fn next_response(&self, request: &LlmRequest) -> MockResponse {
        self.requests.lock().push(request.clone());
        let next = self.responses.lock().pop_front();
        let mock = next.unwrap_or_else(|| {
            debug!(provider = %self.name, "mock queue exhausted, returning placeholder");
            MockResponse::text("(mock: no more queued responses)")
        });
        if let Some(delay) = mock.delay {
            tokio::time::sleep(delay).await;
        }
        mock
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let mock = self.next_response(request).await;

        if let Some(error) = mock.error {
            return Err(DroverError::LlmProvider(error));
        }

        let has_tool_calls = !mock.tool_calls.is_empty();
        let message = Message::assistant(0, mock.text, mock.tool_calls);

        Ok(LlmResponse {
            message,
            usage: mock.usage,
            has_tool_calls,
            stop_reason: mock.stop_reason,
        })
    }

    async fn stream(&self, request: &LlmRequest) -> Result<mpsc::Receiver<StreamChunk>> {
        let mock = self.next_response(request).await;

        if let Some(error) = mock.error {
            return Err(DroverError::LlmProvider(error));
        }

        let (tx, rx) = mpsc::channel(64);
        let pieces = mock.stream_pieces();

        tokio::spawn(async move {
            for piece in pieces {
                let _ = tx.send(StreamChunk::TextDelta(piece)).await;
            }
            if let Some(error) = mock.stream_error {
                let _ = tx.send(StreamChunk::Error(error)).await;
                return;
            }
            if mock.truncated {
                return;
            }
            for tc in mock.tool_calls {
                let _ = tx.send(StreamChunk::ToolCall(tc)).await;
            }
            let _ = tx.send(StreamChunk::Usage(mock.usage)).await;
            let _ = tx.send(StreamChunk::Done(mock.stop_reason)).await;
        });

        Ok(rx)
    }
}
