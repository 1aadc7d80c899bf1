//! # drover-autonomy
//!
//! The policy side of the agent: deciding whether a tool call may run,
//! whether a failed completion should be retried, whether the model is
//! repeating itself, and whether a turn is really finished. Everything here
//! is synchronous or talks only to an [`drover_llm::LlmProvider`]; the
//! runtime wraps these policies in actors.

pub mod approval;
pub mod authorization;
pub mod continuation;
pub mod error_judge;
pub mod loop_detect;

pub use approval::{ApprovalGate, ApprovalHandler, ApprovalRequest, ApprovalResponse, FnApprovalHandler};
pub use authorization::{
    AuthorizationDecision, AuthorizationEngine, LocalFs, PATH_KEYS, PathProbe, ToolKind, normalize_path,
};
pub use continuation::{
    ContinuationJudge, ContinuationVerdict, HeuristicContinuationJudge, ModelContinuationJudge,
};
pub use error_judge::{
    ErrorClass, ErrorJudge, ErrorJudgeDecision, HeuristicErrorJudge, ModelErrorJudge, classify_error,
    heuristic_decision,
};
pub use loop_detect::{FragmentBuffer, LoopCheck, LoopDetector};
