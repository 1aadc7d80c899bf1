//! # drover-actor
//!
//! A small actor substrate on top of tokio. Each actor owns its state and a
//! bounded mailbox and handles one message at a time. Actors talk to each
//! other only through [`ActorRef`]s.

pub mod actor;
pub mod error;
pub mod system;

pub use actor::{Actor, ActorContext, ActorRef};
pub use error::ActorError;
pub use system::{ActorEvent, ActorSystem, SupervisorHook};
