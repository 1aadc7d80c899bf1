use thiserror::Error;

/// Unified error type for the Drover control core.
#[derive(Error, Debug)]
pub enum DroverError {
    // ── Turn / orchestration errors ────────────────────────────
    #[error("agent error: {0}")]
    Agent(String),

    #[error("turn halted: {reason}")]
    Halted { reason: String },

    #[error("completion failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    // ── LLM errors ─────────────────────────────────────────────
    #[error("llm provider error: {0}")]
    LlmProvider(String),

    #[error("provider misconfigured: {0}")]
    ProviderMisconfigured(String),

    // ── Tool errors ────────────────────────────────────────────
    /// Returned by a [`crate::ToolExecutor`] asked for a tool it does not have.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    // ── Actor errors ───────────────────────────────────────────
    #[error("actor error: {0}")]
    Actor(String),

    // ── Session errors ─────────────────────────────────────────
    #[error("session changed concurrently: expected version {expected}, found {found}")]
    SessionConflict { expected: u64, found: u64 },

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DroverError>;
