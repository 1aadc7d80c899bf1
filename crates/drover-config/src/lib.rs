//! # drover-config
//!
//! Configuration system for the Drover runtime. Reads from `drover.toml` and
//! environment variables, in that precedence order, then validates the result.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::DroverConfig;
pub use schema::{
    AgentConfig, AuthorizationConfig, ConfigWarning, JudgeConfig, LoggingConfig,
    LoopDetectionConfig, ToolsConfig, WarningSeverity, resolve_context_window,
};
