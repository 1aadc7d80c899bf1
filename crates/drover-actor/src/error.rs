use drover_core::DroverError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActorError {
    #[error("mailbox full: actor '{actor}' has {capacity} messages queued")]
    MailboxFull { actor: String, capacity: usize },

    #[error("actor '{0}' has stopped")]
    Stopped(String),

    /// The actor dropped the reply channel without answering, usually because
    /// its handler failed or it was stopped mid-request.
    #[error("actor '{0}' dropped the reply")]
    ReplyDropped(String),

    #[error("actors did not stop before the deadline: {}", .0.join(", "))]
    StopTimeout(Vec<String>),
}

impl From<ActorError> for DroverError {
    fn from(e: ActorError) -> Self {
        DroverError::Actor(e.to_string())
    }
}
