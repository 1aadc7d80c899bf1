//! # drover-llm
//!
//! The boundary between the control core and a language model. Concrete
//! providers live outside this workspace; the core only needs the
//! [`LlmProvider`] contract. [`MockProvider`] gives tests a scripted model.

pub mod mock;
pub mod provider;

pub use mock::{MockProvider, MockResponse};
pub use provider::{LlmProvider, LlmRequest, LlmResponse, StopReason, StreamChunk, Usage};
