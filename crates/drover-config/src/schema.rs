use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration, deserialized from `drover.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DroverConfig {
    pub agent: AgentConfig,
    pub authorization: AuthorizationConfig,
    pub judge: JudgeConfig,
    pub loop_detection: LoopDetectionConfig,
    pub tools: ToolsConfig,
    pub logging: LoggingConfig,
}

// ── Agent ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Primary model identifier, e.g. "anthropic/claude-sonnet-4-20250514".
    pub model: String,
    /// Cheaper model used to summarize history during compaction.
    pub summary_model: Option<String>,
    /// Maximum tokens per response.
    pub max_tokens: u32,
    /// Temperature (0.0 - 2.0).
    pub temperature: f32,
    /// Maximum loop iterations per turn before the turn is cut off.
    pub max_iterations: u32,
    /// Attempts per completion request, including the first one.
    pub max_completion_attempts: u32,
    /// Synthetic "continue" nudges allowed per turn.
    pub max_auto_continues: u32,
    /// Context window size in tokens. If 0, inferred from the model name.
    pub context_window: usize,
    /// Compact when estimated usage exceeds this fraction of the window.
    pub compaction_threshold: f64,
    /// Most recent messages that compaction never touches.
    pub keep_recent_messages: usize,
    /// Old user prompts under this fraction of the window stay verbatim in summaries.
    pub verbatim_prompt_fraction: f64,
    /// Maximum tokens per tool result. Longer results are truncated with a note.
    /// Set to 0 to disable truncation.
    pub tool_result_max_tokens: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "anthropic/claude-sonnet-4-20250514".into(),
            summary_model: None,
            max_tokens: 16384,
            temperature: 0.2,
            max_iterations: 50,
            max_completion_attempts: 5,
            max_auto_continues: 3,
            context_window: 0,
            compaction_threshold: 0.9,
            keep_recent_messages: 2,
            verbatim_prompt_fraction: 0.05,
            tool_result_max_tokens: 12_000,
        }
    }
}

// ── Authorization ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    /// Skip every check. Intended for throwaway sandboxes only.
    pub dangerously_allow_all: bool,
    /// Allow any network domain.
    pub allow_all_network: bool,
    /// Domains allowed without asking; entries may be `*.suffix` wildcards.
    pub allowed_domains: Vec<String>,
    /// Shell command prefixes allowed without asking, e.g. "git status", "cargo".
    pub allowed_commands: Vec<String>,
    /// Files or directories that may be created or written without prior reads.
    pub allowed_paths: Vec<PathBuf>,
    /// Extra tool names treated as read-only in addition to the built-in set.
    pub read_only_tools: Vec<String>,
    /// Root against which relative paths are resolved.
    pub workspace_root: PathBuf,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            dangerously_allow_all: false,
            allow_all_network: false,
            allowed_domains: vec![],
            allowed_commands: vec![
                "ls".into(),
                "pwd".into(),
                "cat".into(),
                "git status".into(),
                "git diff".into(),
                "git log".into(),
            ],
            allowed_paths: vec![],
            read_only_tools: vec![],
            workspace_root: PathBuf::from("."),
        }
    }
}

// ── Error judge ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    /// Ask a model to classify completion failures before falling back to heuristics.
    pub use_model: bool,
    /// Model used for judging; falls back to the agent model.
    pub model: Option<String>,
    /// Floor applied to the sleep of every retry decision.
    pub min_sleep_secs: u64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            use_model: false,
            model: None,
            min_sleep_secs: 1,
        }
    }
}

// ── Loop detection ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopDetectionConfig {
    /// Number of recent fragments remembered.
    pub window: usize,
    /// Occurrences within the window that count as a loop.
    pub threshold: usize,
    /// Fragments shorter than this (after normalization) are ignored.
    pub min_fragment_chars: usize,
}

impl Default for LoopDetectionConfig {
    fn default() -> Self {
        Self {
            window: 12,
            threshold: 3,
            min_fragment_chars: 20,
        }
    }
}

// ── Tools ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Interval between "still running" progress updates.
    pub heartbeat_ms: u64,
    /// Mailbox capacity of each runtime actor.
    pub mailbox_capacity: usize,
    /// Seconds to wait for an approval before treating it as denied.
    pub approval_timeout_secs: u64,
    /// Seconds a finished background result is kept for collection.
    pub background_result_ttl_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: 500,
            mailbox_capacity: 64,
            approval_timeout_secs: 300,
            background_result_ttl_secs: 1800,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

/// Resolve the effective context window: explicit config wins, otherwise infer
/// from the model name.
pub fn resolve_context_window(config_value: usize, model: &str) -> usize {
    if config_value > 0 {
        return config_value;
    }
    let m = model.to_lowercase();
    if m.contains("claude") {
        return 200_000;
    }
    if m.contains("gpt-5") || m.contains("gpt5") || m.contains("gemini") {
        return 1_000_000;
    }
    if m.contains("gpt-4o") || m.contains("gpt-4-turbo") {
        return 128_000;
    }
    if m.contains("gpt-4") {
        return 8_192;
    }
    if m.contains("o1") || m.contains("o3") {
        return 200_000;
    }
    if m.contains("llama3") || m.contains("llama-3") || m.contains("deepseek") {
        return 128_000;
    }
    if m.contains("mistral") || m.contains("mixtral") {
        return 32_768;
    }
    128_000
}

/// A problem found while validating the configuration.
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
        };
        write!(f, "{tag}: {}: {}", self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, " ({h})")?;
        }
        Ok(())
    }
}

/// Accumulates validation findings in the order they are checked.
#[derive(Default)]
struct Findings(Vec<ConfigWarning>);

impl Findings {
    fn record(&mut self, severity: WarningSeverity, field: &str, message: impl Into<String>, hint: Option<&str>) {
        self.0.push(ConfigWarning {
            field: field.to_string(),
            message: message.into(),
            severity,
            hint: hint.map(str::to_string),
        });
    }

    fn error(&mut self, field: &str, message: impl Into<String>, hint: Option<&str>) {
        self.record(WarningSeverity::Error, field, message, hint);
    }

    fn warn(&mut self, field: &str, message: impl Into<String>, hint: Option<&str>) {
        self.record(WarningSeverity::Warning, field, message, hint);
    }

    fn one_of(&mut self, field: &str, value: &str, allowed: &[&str]) {
        if !allowed.contains(&value) {
            let hint = format!("Valid values: {}", allowed.join(", "));
            self.warn(field, format!("unknown value '{value}'"), Some(&hint));
        }
    }

    /// `Err` lists every error-level finding; otherwise the warnings are returned.
    fn finish(self) -> Result<Vec<ConfigWarning>, String> {
        let errors: Vec<String> = self
            .0
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();
        if errors.is_empty() {
            Ok(self.0)
        } else {
            Err(format!("invalid configuration:\n  - {}", errors.join("\n  - ")))
        }
    }
}

impl DroverConfig {
    /// Check value ranges and cross-field consistency.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut f = Findings::default();
        let agent = &self.agent;

        if agent.model.trim().is_empty() {
            f.error("agent.model", "no model configured", Some("e.g. 'anthropic/claude-sonnet-4-20250514'"));
        }
        if !(0.0..=2.0).contains(&agent.temperature) {
            f.error("agent.temperature", format!("{} is outside 0.0..=2.0", agent.temperature), None);
        }
        if agent.max_tokens == 0 {
            f.error("agent.max_tokens", "a zero output budget produces empty replies", None);
        }
        if agent.max_iterations == 0 {
            f.error("agent.max_iterations", "no turn can make progress with zero iterations", None);
        }
        if agent.max_completion_attempts == 0 {
            f.error("agent.max_completion_attempts", "at least one completion attempt is required", None);
        }
        if !(0.1..=1.0).contains(&agent.compaction_threshold) {
            f.error(
                "agent.compaction_threshold",
                format!("{} is outside 0.1..=1.0", agent.compaction_threshold),
                Some("0.9 compacts at 90% of the window"),
            );
        }
        if agent.keep_recent_messages < 2 {
            f.warn(
                "agent.keep_recent_messages",
                "keeping fewer than 2 messages lets compaction swallow the current exchange",
                None,
            );
        }

        let auth = &self.authorization;
        if auth.dangerously_allow_all {
            f.warn(
                "authorization.dangerously_allow_all",
                "every tool call is allowed without checks",
                Some("only for disposable sandboxes"),
            );
        }
        for domain in auth.allowed_domains.iter().filter(|d| d.contains('*') && !d.starts_with("*.")) {
            f.warn(
                "authorization.allowed_domains",
                format!("'{domain}' uses a wildcard outside a leading '*.'"),
                None,
            );
        }

        let loops = &self.loop_detection;
        if loops.threshold < 2 {
            f.error("loop_detection.threshold", "a threshold below 2 flags every fragment", None);
        }
        if loops.window < loops.threshold {
            f.warn("loop_detection.window", "window is smaller than the threshold; loops go unnoticed", None);
        }

        if self.tools.heartbeat_ms == 0 {
            f.error("tools.heartbeat_ms", "heartbeat interval must be positive", None);
        }
        if self.tools.mailbox_capacity == 0 {
            f.error("tools.mailbox_capacity", "mailbox capacity must be positive", None);
        }

        f.one_of("logging.format", &self.logging.format, &["pretty", "json", "compact"]);
        f.one_of("logging.level", &self.logging.level, &["trace", "debug", "info", "warn", "error"]);

        f.finish()
    }

    /// Effective context window for the configured model.
    pub fn context_window(&self) -> usize {
        resolve_context_window(self.agent.context_window, &self.agent.model)
    }
}
