//! # drover-runtime
//!
//! The turn loop and the actors it talks to.
//!
//! ```text
//!                 ┌──────────────┐   TurnEvent    ┌───────────┐
//!   prompt ─────► │ Orchestrator │ ─────────────► │ front end │
//!                 └──────┬───────┘ ◄── approval ─ └───────────┘
//!          ┌─────────────┼──────────────┬───────────────┐
//!          ▼             ▼              ▼               ▼
//!   ┌────────────┐ ┌────────────┐ ┌────────────┐ ┌────────────┐
//!   │ authorizer │ │    tool    │ │   error    │ │ compactor  │
//!   │   actor    │ │ supervisor │ │   judge    │ │            │
//!   └────────────┘ └────────────┘ └────────────┘ └────────────┘
//! ```

pub mod authorizer;
pub mod compaction;
pub mod context;
pub mod events;
pub mod judge;
pub mod logging;
pub mod orchestrator;
pub mod supervisor;

pub use authorizer::{AuthorizerActor, AuthorizerMsg};
pub use compaction::{CompactionOutcome, Compactor};
pub use context::{ContextUsage, truncate_tool_result};
pub use events::TurnEvent;
pub use judge::{JudgeActor, JudgeMsg};
pub use logging::init_tracing;
pub use orchestrator::{Orchestrator, OrchestratorBuilder, SystemPromptFn, TurnOutcome};
pub use supervisor::{BackgroundStatus, ExecuteRequest, SupervisorActor, SupervisorMsg};
