//! Context-window accounting.

use drover_core::{Message, estimate_history_tokens};

/// Estimated occupancy of the model's context window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextUsage {
    pub used_tokens: usize,
    pub window: usize,
}

impl ContextUsage {
    pub fn measure(messages: &[Message], system_prompt: Option<&str>, window: usize) -> Self {
        Self {
            used_tokens: estimate_history_tokens(messages, system_prompt),
            window,
        }
    }

    pub fn fraction_used(&self) -> f64 {
        if self.window == 0 {
            return 1.0;
        }
        self.used_tokens as f64 / self.window as f64
    }

    /// Share of the window still free, 0.0..=100.0.
    pub fn free_percent(&self) -> f64 {
        ((1.0 - self.fraction_used()) * 100.0).clamp(0.0, 100.0)
    }

    pub fn needs_compaction(&self, threshold: f64) -> bool {
        self.fraction_used() >= threshold
    }
}

/// Truncate a tool result to roughly `max_tokens`, keeping the first 60% and
/// last 20% of the budget. `0` disables truncation.
pub fn truncate_tool_result(content: &str, max_tokens: usize) -> String {
    if max_tokens == 0 {
        return content.to_string();
    }
    let max_chars = max_tokens * 4;
    let total_chars = content.chars().count();
    if total_chars <= max_chars {
        return content.to_string();
    }

    let head_chars = max_chars * 6 / 10;
    let tail_chars = max_chars * 2 / 10;
    let head: String = content.chars().take(head_chars).collect();
    let tail: String = content.chars().skip(total_chars - tail_chars).collect();
    let omitted_chars = total_chars - head_chars - tail_chars;
    let omitted_tokens = omitted_chars / 4;

    format!(
        "{head}\n\n[... truncated {omitted_tokens} tokens ({omitted_chars} chars) to fit context window ...]\n\n{tail}"
    )
}
