//! # drover-core
//!
//! Core types, traits, and primitives for the Drover agent control core.
//! This crate defines the shared vocabulary used by every other crate in the workspace:
//! messages, tool calls and results, the session log, and the unified error type.

pub mod error;
pub mod message;
pub mod session;
pub mod tool;

pub use error::{DroverError, Result};
pub use message::{Message, MessageContent, Role, estimate_history_tokens};
pub use session::{AuthScope, Session, SessionId, SessionSnapshot, SharedSession};
pub use tool::{Tool, ToolArgs, ToolCall, ToolExecutor, ToolResult};
