use serde::Serialize;
use tokio::sync::mpsc;

/// Everything a turn reports outward while it runs. A front end receives
/// these over the channel handed to [`crate::Orchestrator::process_prompt`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum TurnEvent {
    #[serde(rename = "text")]
    TextDelta { content: String },
    #[serde(rename = "status")]
    Status { message: String },
    /// Ephemeral heartbeat for a running tool. Dropped when the channel is full.
    #[serde(rename = "progress")]
    Progress {
        tool_call_id: String,
        tool_name: String,
        elapsed_ms: u64,
        indicator: char,
    },
    #[serde(rename = "tool_call")]
    ToolCall {
        id: String,
        name: String,
        args: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        id: String,
        name: String,
        content: String,
        is_error: bool,
    },
    #[serde(rename = "approval_required")]
    ApprovalRequired {
        id: String,
        tool_name: String,
        tool_args: serde_json::Value,
        reason: String,
    },
    #[serde(rename = "context_usage")]
    ContextUsage {
        used_tokens: usize,
        window: usize,
        free_percent: f64,
    },
    #[serde(rename = "retry")]
    Retry {
        attempt: u32,
        sleep_secs: u64,
        reason: String,
    },
    #[serde(rename = "loop_detected")]
    LoopDetected { pattern: String, repeat_count: usize },
    #[serde(rename = "compacted")]
    Compacted {
        messages_before: usize,
        messages_after: usize,
    },
    #[serde(rename = "done")]
    Done { iterations: u32 },
}

impl TurnEvent {
    pub fn status(message: impl Into<String>) -> Self {
        TurnEvent::Status {
            message: message.into(),
        }
    }

    /// True for events a slow consumer may miss without losing information.
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, TurnEvent::Progress { .. })
    }
}

/// Deliver an event. Ephemeral events never wait for channel space; the rest
/// wait, and a closed channel is ignored.
pub async fn emit(events: &mpsc::Sender<TurnEvent>, event: TurnEvent) {
    if event.is_ephemeral() {
        let _ = events.try_send(event);
    } else {
        let _ = events.send(event).await;
    }
}
