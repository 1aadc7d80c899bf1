//! History compaction: replace the oldest messages with one summary message.
//!
//! A compaction works on a snapshot, so the summary call runs without holding
//! the session lock. The splice is a compare-and-swap on the session version;
//! if anything was appended in the meantime the summary is thrown away.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use drover_config::DroverConfig;
use drover_core::{DroverError, Message, Role, SharedSession};
use drover_llm::{LlmProvider, LlmRequest};
use tracing::{debug, info, warn};

const SUMMARY_SYSTEM_PROMPT: &str =
    "You are a precise conversation summarizer. Output only the summary, nothing else.";
const SUMMARY_MAX_TOKENS: u32 = 2048;
/// Per-message character cap in the transcript sent to the summarizer.
const TRANSCRIPT_LINE_CHARS: usize = 500;
/// Per-message character cap in the fallback digest.
const DIGEST_LINE_CHARS: usize = 200;
/// Length an over-budget user prompt is condensed to.
const CONDENSED_PROMPT_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    Compacted {
        messages_before: usize,
        messages_after: usize,
    },
    /// The history is too short to leave anything worth summarizing.
    NothingToCompact,
    /// Another compaction is already running.
    Busy,
    /// The session changed between snapshot and splice.
    Conflict,
}

impl CompactionOutcome {
    pub fn compacted(&self) -> bool {
        matches!(self, CompactionOutcome::Compacted { .. })
    }
}

pub struct Compactor {
    provider: Arc<dyn LlmProvider>,
    model: String,
    keep_recent: usize,
    verbatim_budget_tokens: usize,
    in_progress: AtomicBool,
}

impl Compactor {
    /// `verbatim_budget_tokens` bounds how much of the old user prompts is
    /// carried over word for word.
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        keep_recent: usize,
        verbatim_budget_tokens: usize,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            keep_recent,
            verbatim_budget_tokens,
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn from_config(provider: Arc<dyn LlmProvider>, config: &DroverConfig) -> Self {
        let agent = &config.agent;
        let model = agent.summary_model.clone().unwrap_or_else(|| agent.model.clone());
        let budget = (config.context_window() as f64 * agent.verbatim_prompt_fraction) as usize;
        Self::new(provider, model, agent.keep_recent_messages, budget)
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub async fn compact(&self, session: &SharedSession) -> CompactionOutcome {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("compaction already in progress");
            return CompactionOutcome::Busy;
        }
        let _guard = InProgress(&self.in_progress);

        let snapshot = session.lock().snapshot();
        let Some(cut) = split_point(&snapshot.messages, self.keep_recent) else {
            return CompactionOutcome::NothingToCompact;
        };
        let prefix = &snapshot.messages[..cut];
        info!(session = snapshot.session_id, messages = cut, "compacting conversation history");

        let summary = match self.summarize(prefix).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(session = snapshot.session_id, error = %e, "summary model failed, using naive digest");
                naive_digest(prefix)
            }
        };
        let text = format!(
            "[Summary of {cut} earlier messages]\n{summary}{}",
            self.carried_prompts(prefix)
        );
        let message = Message::text(snapshot.session_id, Role::System, text).synthetic();

        let messages_before = snapshot.messages.len();
        match session.lock().splice_compacted(snapshot.version, cut, message) {
            Ok(()) => {
                let messages_after = messages_before - cut + 1;
                info!(session = snapshot.session_id, messages_before, messages_after, "compaction applied");
                CompactionOutcome::Compacted {
                    messages_before,
                    messages_after,
                }
            }
            Err(e) => {
                warn!(session = snapshot.session_id, error = %e, "compaction discarded");
                CompactionOutcome::Conflict
            }
        }
    }

    async fn summarize(&self, prefix: &[Message]) -> drover_core::Result<String> {
        let prompt = format!(
            "Summarize this conversation history concisely. Preserve:\n\
             - The user's original request and goals\n\
             - Key decisions and outcomes\n\
             - File paths, commands, and technical details that were discussed\n\
             - Any errors encountered and how they were resolved\n\
             - Current state of progress (what's done, what remains)\n\n\
             Keep the summary under 500 words. Be factual and specific.\n\n\
             Conversation to summarize:\n{}",
            transcript(prefix, TRANSCRIPT_LINE_CHARS)
        );
        let request = LlmRequest::single_prompt(&self.model, SUMMARY_SYSTEM_PROMPT, prompt, SUMMARY_MAX_TOKENS);
        let summary = self.provider.complete(&request).await?.text();
        if summary.trim().is_empty() {
            return Err(DroverError::LlmProvider("summary model returned no text".into()));
        }
        Ok(summary)
    }

    /// Old user prompts, verbatim until the budget is spent and condensed after.
    fn carried_prompts(&self, prefix: &[Message]) -> String {
        let mut spent = 0usize;
        let mut lines = Vec::new();
        for msg in prefix.iter().filter(|m| m.role == Role::User && !m.synthetic) {
            let text = msg.text_content();
            let cost = msg.estimate_tokens();
            if spent + cost <= self.verbatim_budget_tokens {
                spent += cost;
                lines.push(format!("- {text}"));
            } else {
                lines.push(format!("- {} (condensed)", clip(&text, CONDENSED_PROMPT_CHARS)));
            }
        }
        if lines.is_empty() {
            String::new()
        } else {
            format!("\n\n[Earlier user requests]\n{}", lines.join("\n"))
        }
    }
}

struct InProgress<'a>(&'a AtomicBool);

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Index of the first message to keep. Moves earlier so a tool result is never
/// separated from the assistant message that requested it. `None` when fewer
/// than two messages would be summarized.
pub fn split_point(messages: &[Message], keep_recent: usize) -> Option<usize> {
    let mut cut = messages.len().checked_sub(keep_recent)?;
    while cut > 0 && messages.get(cut).is_some_and(|m| m.role == Role::Tool) {
        cut -= 1;
    }
    (cut >= 2).then_some(cut)
}

fn transcript(messages: &[Message], line_chars: usize) -> String {
    messages
        .iter()
        .map(|m| {
            let mut line = format!("[{}]: {}", m.role.label(), clip(&m.text_content(), line_chars));
            for call in &m.tool_calls {
                line.push_str(&format!("\n[{} -> {}]", m.role.label(), clip(&call.signature(), line_chars)));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Deterministic digest used when the summary model is unavailable.
pub fn naive_digest(messages: &[Message]) -> String {
    format!(
        "Condensed transcript ({} messages):\n{}",
        messages.len(),
        transcript(messages, DIGEST_LINE_CHARS)
    )
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max_chars).collect();
    clipped.push_str("...");
    clipped
}
