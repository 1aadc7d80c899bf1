//! Turn-completeness judging: did the model actually finish, or did it stop
//! early and hand the remaining work back to the user?

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use drover_llm::{LlmProvider, LlmRequest};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationVerdict {
    pub should_continue: bool,
    pub reason: String,
}

impl ContinuationVerdict {
    pub fn complete(reason: impl Into<String>) -> Self {
        Self {
            should_continue: false,
            reason: reason.into(),
        }
    }

    pub fn incomplete(reason: impl Into<String>) -> Self {
        Self {
            should_continue: true,
            reason: reason.into(),
        }
    }
}

/// Decides whether a tool-less assistant reply ends the turn.
#[async_trait]
pub trait ContinuationJudge: Send + Sync {
    /// `iteration` is the 1-based loop iteration that produced `reply`.
    async fn judge(&self, user_prompt: &str, reply: &str, iteration: u32) -> ContinuationVerdict;
}

const COMPLETION_SIGNALS: &[&str] = &[
    "all files created",
    "project is complete",
    "everything is set up and working",
    "all done",
    "finished creating all",
    "all components created",
    "fully functional",
    "here's what i built",
    "here is what i built",
    "i've created all",
    "i have created all",
    "task complete",
    "all tests pass",
];

const DEFERRAL_PHRASES: &[&str] = &[
    "you can customize",
    "you can further",
    "you can modify",
    "you can adjust",
    "you can extend",
    "you can add more",
    "feel free to",
    "i'll leave",
    "left as an exercise",
    "up to you to",
    "you'll need to",
    "you should create",
    "you would need to",
    "the remaining",
    "repeat this for",
    "do the same for",
    "continue this pattern",
    "follow the same pattern",
    "and so on for",
];

const SCAFFOLD_PHRASES: &[&str] = &[
    "has been set up",
    "is now set up",
    "successfully set up",
    "ready for development",
    "you can start developing",
    "you can start building",
    "you can now start",
];

/// Phrase-based judge: short replies and explicit completion claims end the
/// turn, deferral language ("feel free to", "the remaining...") does not.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicContinuationJudge;

impl HeuristicContinuationJudge {
    pub fn assess(reply: &str, iteration: u32) -> ContinuationVerdict {
        if reply.len() < 100 {
            return ContinuationVerdict::complete("short confirmation");
        }
        let lower = reply.to_lowercase();
        if COMPLETION_SIGNALS.iter().any(|p| lower.contains(*p)) {
            return ContinuationVerdict::complete("reply claims completion");
        }

        let deferrals = DEFERRAL_PHRASES.iter().filter(|p| lower.contains(**p)).count();

        // Scaffolding and stopping is only suspicious before much work happened.
        if iteration < 5 && deferrals >= 1 && SCAFFOLD_PHRASES.iter().any(|p| lower.contains(*p)) {
            return ContinuationVerdict::incomplete("stopped after scaffolding and deferred the rest");
        }

        let threshold = if iteration >= 8 { 3 } else { 2 };
        if deferrals >= threshold {
            ContinuationVerdict::incomplete(format!("reply defers work to the user ({deferrals} deferral phrases)"))
        } else {
            ContinuationVerdict::complete("no deferral detected")
        }
    }
}

#[async_trait]
impl ContinuationJudge for HeuristicContinuationJudge {
    async fn judge(&self, _user_prompt: &str, reply: &str, iteration: u32) -> ContinuationVerdict {
        Self::assess(reply, iteration)
    }
}

const CONTINUATION_SYSTEM_PROMPT: &str = "You review whether a coding assistant finished the user's request. \
Incomplete means the assistant stopped early, promised work it did not do, or left required steps to the user. \
Answer with exactly two lines:\n\
STATUS: COMPLETE or INCOMPLETE\n\
REASON: <one short sentence>";

const MODEL_TIMEOUT: Duration = Duration::from_secs(20);
/// Characters of the reply shown to the judge model.
const REPLY_EXCERPT_CHARS: usize = 4_000;

/// Asks a cheap model whether the turn is complete; falls back to
/// [`HeuristicContinuationJudge`] when the call fails or the answer is unclear.
pub struct ModelContinuationJudge {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl ModelContinuationJudge {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl ContinuationJudge for ModelContinuationJudge {
    async fn judge(&self, user_prompt: &str, reply: &str, iteration: u32) -> ContinuationVerdict {
        let skip = reply.chars().count().saturating_sub(REPLY_EXCERPT_CHARS);
        let excerpt: String = reply.chars().skip(skip).collect();
        let prompt = format!("User request:\n{user_prompt}\n\nAssistant's final reply:\n{excerpt}");
        let request = LlmRequest::single_prompt(&self.model, CONTINUATION_SYSTEM_PROMPT, prompt, 100);

        match tokio::time::timeout(MODEL_TIMEOUT, self.provider.complete(&request)).await {
            Ok(Ok(resp)) => match parse_continuation_reply(&resp.text()) {
                Some(verdict) => {
                    debug!(should_continue = verdict.should_continue, "model judged turn completeness");
                    verdict
                }
                None => HeuristicContinuationJudge::assess(reply, iteration),
            },
            Ok(Err(e)) => {
                warn!(error = %e, "continuation judge failed; using heuristics");
                HeuristicContinuationJudge::assess(reply, iteration)
            }
            Err(_) => {
                warn!("continuation judge timed out; using heuristics");
                HeuristicContinuationJudge::assess(reply, iteration)
            }
        }
    }
}

/// Parse `STATUS: COMPLETE|INCOMPLETE` and `REASON: text`.
pub fn parse_continuation_reply(reply: &str) -> Option<ContinuationVerdict> {
    let mut status = None;
    let mut reason = String::new();
    for line in reply.lines() {
        let cleaned: String = line.chars().filter(|c| !matches!(c, '*' | '`')).collect();
        let Some((key, value)) = cleaned.split_once(':') else {
            continue;
        };
        match key.trim().to_ascii_uppercase().as_str() {
            "STATUS" => {
                let v = value.trim().to_ascii_uppercase();
                if v.starts_with("INCOMPLETE") {
                    status = Some(true);
                } else if v.starts_with("COMPLETE") {
                    status = Some(false);
                }
            }
            "REASON" => reason = value.trim().to_string(),
            _ => {}
        }
    }
    let should_continue = status?;
    if reason.is_empty() {
        reason = "judged by model".into();
    }
    Some(ContinuationVerdict { should_continue, reason })
}
