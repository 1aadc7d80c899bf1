//! Retry-or-halt decisions for failed completion requests.
//!
//! [`classify_error`] holds every substring rule in one place so it can be
//! replaced by structured provider error codes later. [`ModelErrorJudge`]
//! asks a model first and falls back to the same heuristics.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use drover_llm::{LlmProvider, LlmRequest};
use tracing::{debug, warn};

/// Longest sleep any decision may request.
const MAX_SLEEP_SECS: u64 = 300;
const RATE_LIMIT_BASE_SECS: u64 = 5;
const RATE_LIMIT_CAP_SECS: u64 = 60;
const NETWORK_CAP_SECS: u64 = 10;
/// Unknown errors are retried only this many times.
const UNKNOWN_RETRY_ATTEMPTS: u32 = 2;
const MODEL_JUDGE_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorJudgeDecision {
    pub should_retry: bool,
    pub sleep_seconds: u64,
    pub trigger_compaction: bool,
    pub reason: String,
}

impl ErrorJudgeDecision {
    pub fn retry(sleep_seconds: u64, reason: impl Into<String>) -> Self {
        Self {
            should_retry: true,
            sleep_seconds,
            trigger_compaction: false,
            reason: reason.into(),
        }
    }

    pub fn halt(reason: impl Into<String>) -> Self {
        Self {
            should_retry: false,
            sleep_seconds: 0,
            trigger_compaction: false,
            reason: reason.into(),
        }
    }

    pub fn with_compaction(mut self) -> Self {
        self.trigger_compaction = true;
        self
    }

    /// Retries never sleep less than `min_sleep` nor longer than the global cap.
    fn clamped(mut self, min_sleep: u64) -> Self {
        if self.should_retry {
            self.sleep_seconds = self.sleep_seconds.clamp(min_sleep, MAX_SLEEP_SECS.max(min_sleep));
        } else {
            self.sleep_seconds = 0;
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    ContextOverflow,
    RateLimit,
    Fatal,
    Server,
    Network,
    Unknown,
}

/// Classify a provider error by its text. Rules are checked in declaration
/// order of [`ErrorClass`], so "400: prompt is too long" is a context overflow.
pub fn classify_error(error: &str) -> ErrorClass {
    let e = error.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| e.contains(n));

    if any(&[
        "context length",
        "context_length",
        "context window",
        "maximum context",
        "too long",
        "too many tokens",
        "max_tokens exceeded",
        "max tokens exceeded",
        "token limit",
    ]) {
        ErrorClass::ContextOverflow
    } else if any(&["429", "rate limit", "rate_limit", "ratelimit", "too many requests"]) {
        ErrorClass::RateLimit
    } else if any(&[
        "400",
        "401",
        "403",
        "unauthorized",
        "forbidden",
        "authentication",
        "invalid api key",
        "invalid_api_key",
        "bad request",
        "misconfigured",
    ]) {
        ErrorClass::Fatal
    } else if any(&[
        "500",
        "502",
        "503",
        "504",
        "529",
        "internal server error",
        "bad gateway",
        "service unavailable",
        "overloaded",
        "timeout",
        "timed out",
    ]) {
        ErrorClass::Server
    } else if any(&[
        "connection",
        "network",
        "eof",
        "broken pipe",
        "reset by peer",
        "dns",
        "unreachable",
        "stream ended",
    ]) {
        ErrorClass::Network
    } else {
        ErrorClass::Unknown
    }
}

/// The built-in policy. `attempt` is 1-based.
pub fn heuristic_decision(error: &str, attempt: u32, max_attempts: u32, min_sleep: u64) -> ErrorJudgeDecision {
    if attempt >= max_attempts {
        return ErrorJudgeDecision::halt(format!("giving up after {attempt} of {max_attempts} attempts"));
    }
    let n = u64::from(attempt.max(1));
    let decision = match classify_error(error) {
        ErrorClass::ContextOverflow => {
            ErrorJudgeDecision::retry(0, "context window exceeded; compacting before retry").with_compaction()
        }
        ErrorClass::RateLimit => {
            let backoff = RATE_LIMIT_BASE_SECS
                .saturating_mul(1u64 << (n - 1).min(16))
                .min(RATE_LIMIT_CAP_SECS);
            ErrorJudgeDecision::retry(backoff, "rate limited")
        }
        ErrorClass::Fatal => ErrorJudgeDecision::halt("non-retryable request or authentication error"),
        ErrorClass::Server => ErrorJudgeDecision::retry(3 * n, "provider server error or timeout"),
        ErrorClass::Network => ErrorJudgeDecision::retry((2 * n).min(NETWORK_CAP_SECS), "network error"),
        ErrorClass::Unknown if attempt <= UNKNOWN_RETRY_ATTEMPTS => {
            ErrorJudgeDecision::retry(2 * n, "unrecognized error; retrying")
        }
        ErrorClass::Unknown => ErrorJudgeDecision::halt("unrecognized error persisted"),
    };
    decision.clamped(min_sleep)
}

/// Decides whether a failed completion should be retried.
#[async_trait]
pub trait ErrorJudge: Send + Sync {
    async fn judge(&self, error: &str, attempt: u32, max_attempts: u32, model: &str) -> ErrorJudgeDecision;
}

/// Substring heuristics only.
#[derive(Debug, Clone)]
pub struct HeuristicErrorJudge {
    min_sleep_secs: u64,
}

impl HeuristicErrorJudge {
    pub fn new(min_sleep_secs: u64) -> Self {
        Self { min_sleep_secs }
    }
}

impl Default for HeuristicErrorJudge {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl ErrorJudge for HeuristicErrorJudge {
    async fn judge(&self, error: &str, attempt: u32, max_attempts: u32, _model: &str) -> ErrorJudgeDecision {
        heuristic_decision(error, attempt, max_attempts, self.min_sleep_secs)
    }
}

const JUDGE_SYSTEM_PROMPT: &str = "You triage failures of language-model API calls made by a coding agent. \
Decide whether the call should be retried. Answer with exactly these lines and nothing else:\n\
DECISION: RETRY or HALT\n\
SLEEP_SECONDS: <integer seconds to wait before retrying>\n\
TRIGGER_COMPACTION: YES or NO (YES when the conversation is too long for the model)\n\
REASON: <one short sentence>";

/// Asks a secondary model to judge the failure, falling back to the
/// heuristics if the model call fails or its answer cannot be parsed.
pub struct ModelErrorJudge {
    provider: Arc<dyn LlmProvider>,
    judge_model: String,
    min_sleep_secs: u64,
}

impl ModelErrorJudge {
    pub fn new(provider: Arc<dyn LlmProvider>, judge_model: impl Into<String>, min_sleep_secs: u64) -> Self {
        Self {
            provider,
            judge_model: judge_model.into(),
            min_sleep_secs,
        }
    }
}

#[async_trait]
impl ErrorJudge for ModelErrorJudge {
    async fn judge(&self, error: &str, attempt: u32, max_attempts: u32, model: &str) -> ErrorJudgeDecision {
        if attempt >= max_attempts {
            return heuristic_decision(error, attempt, max_attempts, self.min_sleep_secs);
        }

        let prompt = format!(
            "Model: {model}\nAttempt: {attempt} of {max_attempts}\nError:\n{error}"
        );
        let request = LlmRequest::single_prompt(&self.judge_model, JUDGE_SYSTEM_PROMPT, prompt, 200);

        let reply = match tokio::time::timeout(MODEL_JUDGE_TIMEOUT, self.provider.complete(&request)).await {
            Ok(Ok(resp)) => resp.text(),
            Ok(Err(e)) => {
                warn!(error = %e, "error judge model failed; using heuristics");
                return heuristic_decision(error, attempt, max_attempts, self.min_sleep_secs);
            }
            Err(_) => {
                warn!("error judge model timed out; using heuristics");
                return heuristic_decision(error, attempt, max_attempts, self.min_sleep_secs);
            }
        };

        match parse_judge_reply(&reply) {
            Some(decision) => {
                debug!(retry = decision.should_retry, sleep = decision.sleep_seconds, "model judged error");
                decision.clamped(self.min_sleep_secs)
            }
            None => {
                warn!(reply = %reply, "unparseable error judge reply; using heuristics");
                heuristic_decision(error, attempt, max_attempts, self.min_sleep_secs)
            }
        }
    }
}

/// Parse the `KEY: value` reply format. Keys are case-insensitive and may be
/// wrapped in markdown emphasis. Returns `None` without a usable DECISION line.
pub fn parse_judge_reply(reply: &str) -> Option<ErrorJudgeDecision> {
    let mut retry = None;
    let mut sleep: i64 = 0;
    let mut compact = false;
    let mut reason = String::new();

    for line in reply.lines() {
        let cleaned: String = line.chars().filter(|c| !matches!(c, '*' | '`' | '#')).collect();
        let Some((key, value)) = cleaned.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim().to_ascii_uppercase().replace(' ', "_").as_str() {
            "DECISION" => {
                let v = value.to_ascii_uppercase();
                if v.contains("RETRY") {
                    retry = Some(true);
                } else if v.contains("HALT") || v.contains("STOP") {
                    retry = Some(false);
                }
            }
            "SLEEP_SECONDS" | "SLEEP" => {
                let digits: String = value
                    .chars()
                    .enumerate()
                    .take_while(|(i, c)| c.is_ascii_digit() || (*i == 0 && *c == '-'))
                    .map(|(_, c)| c)
                    .collect();
                sleep = digits.parse().unwrap_or(0);
            }
            "TRIGGER_COMPACTION" | "COMPACTION" => {
                compact = matches!(value.to_ascii_uppercase().as_str(), "YES" | "TRUE" | "Y");
            }
            "REASON" => reason = value.to_string(),
            _ => {}
        }
    }

    let should_retry = retry?;
    if reason.is_empty() {
        reason = "judged by model".into();
    }
    Some(ErrorJudgeDecision {
        should_retry,
        sleep_seconds: sleep.max(0) as u64,
        trigger_compaction: should_retry && compact,
        reason,
    })
}
