use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::ActorError;

/// A sequential worker. The system calls [`Actor::handle`] for one message at
/// a time, in mailbox order, and never re-enters it.
#[async_trait]
pub trait Actor: Send + 'static {
    type Message: Send + 'static;

    async fn handle(&mut self, msg: Self::Message, ctx: &ActorContext) -> drover_core::Result<()>;

    /// Runs once before the first message.
    async fn on_start(&mut self, _ctx: &ActorContext) {}

    /// Runs once after the mailbox has been drained during a graceful stop.
    async fn on_stop(&mut self) {}
}

/// Per-actor runtime information handed to every handler call.
#[derive(Debug, Clone)]
pub struct ActorContext {
    name: Arc<str>,
    cancel: CancellationToken,
}

impl ActorContext {
    pub(crate) fn new(name: Arc<str>, cancel: CancellationToken) -> Self {
        Self { name, cancel }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fires when the actor (or the whole system) is asked to stop.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Handle for sending messages to a running actor.
pub struct ActorRef<M> {
    name: Arc<str>,
    capacity: usize,
    tx: mpsc::Sender<M>,
    cancel: CancellationToken,
}

impl<M> Clone for ActorRef<M> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            capacity: self.capacity,
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<M> fmt::Debug for ActorRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRef")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl<M> ActorRef<M> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl<M: Send + 'static> ActorRef<M> {
    pub(crate) fn new(
        name: Arc<str>,
        capacity: usize,
        tx: mpsc::Sender<M>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name,
            capacity,
            tx,
            cancel,
        }
    }

    /// Enqueue without waiting. Fails with [`ActorError::MailboxFull`] when the
    /// mailbox is at capacity.
    pub fn send(&self, msg: M) -> Result<(), ActorError> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ActorError::MailboxFull {
                actor: self.name.to_string(),
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => ActorError::Stopped(self.name.to_string()),
        })
    }

    /// Enqueue, waiting for mailbox space if necessary.
    pub async fn send_wait(&self, msg: M) -> Result<(), ActorError> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| ActorError::Stopped(self.name.to_string()))
    }

    /// Request/response: build a message around a reply channel, send it, and
    /// await the answer. Waits for mailbox space like [`ActorRef::send_wait`].
    pub async fn ask<R, F>(&self, build: F) -> Result<R, ActorError>
    where
        F: FnOnce(oneshot::Sender<R>) -> M,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_wait(build(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|_| ActorError::ReplyDropped(self.name.to_string()))
    }

    /// Ask this actor alone to drain its mailbox and stop.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}
