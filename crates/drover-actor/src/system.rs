use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::actor::{Actor, ActorContext, ActorRef};
use crate::error::ActorError;

/// Something the system observed about an actor that a supervisor may want to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorEvent {
    /// A handler returned an error. The actor keeps running.
    HandlerFailed { actor: String, error: String },
    /// A handler panicked. The actor is stopped and its queued messages are
    /// discarded, which drops any reply channels they carried.
    Panicked {
        actor: String,
        message: String,
        discarded: usize,
    },
    /// The actor finished its graceful stop.
    Stopped { actor: String },
}

/// Callback invoked for every [`ActorEvent`].
pub type SupervisorHook = Arc<dyn Fn(ActorEvent) + Send + Sync>;

struct Running {
    name: String,
    join: JoinHandle<()>,
}

/// Owns every spawned actor and coordinates their shutdown.
pub struct ActorSystem {
    root: CancellationToken,
    actors: Mutex<Vec<Running>>,
    supervisor: Option<SupervisorHook>,
}

impl Default for ActorSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl ActorSystem {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            actors: Mutex::new(Vec::new()),
            supervisor: None,
        }
    }

    pub fn with_supervisor(mut self, hook: SupervisorHook) -> Self {
        self.supervisor = Some(hook);
        self
    }

    /// Start `actor` under `name` with a mailbox holding at most `capacity`
    /// messages. Must be called from within a tokio runtime.
    pub fn spawn<A: Actor>(&self, name: &str, actor: A, capacity: usize) -> ActorRef<A::Message> {
        let capacity = capacity.max(1);
        let name: Arc<str> = Arc::from(name);
        let (tx, rx) = mpsc::channel(capacity);
        let cancel = self.root.child_token();
        let ctx = ActorContext::new(Arc::clone(&name), cancel.clone());

        let join = tokio::spawn(run_actor(actor, rx, ctx, self.supervisor.clone()));
        self.actors.lock().push(Running {
            name: name.to_string(),
            join,
        });
        debug!(actor = %name, capacity, "actor spawned");

        ActorRef::new(name, capacity, tx, cancel)
    }

    /// Number of actors spawned and not yet collected by [`ActorSystem::stop_all`].
    pub fn len(&self) -> usize {
        self.actors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.lock().is_empty()
    }

    /// Ask every actor to drain its mailbox and exit, waiting at most
    /// `deadline` in total. Actors still running after that are aborted and
    /// named in the returned [`ActorError::StopTimeout`].
    pub async fn stop_all(&self, deadline: Duration) -> Result<(), ActorError> {
        let running = std::mem::take(&mut *self.actors.lock());
        info!(actors = running.len(), ?deadline, "stopping actor system");
        self.root.cancel();

        let until = tokio::time::Instant::now() + deadline;
        let mut stuck = Vec::new();
        for mut actor in running {
            match tokio::time::timeout_at(until, &mut actor.join).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(actor = %actor.name, error = %e, "actor task ended abnormally"),
                Err(_) => {
                    actor.join.abort();
                    stuck.push(actor.name);
                }
            }
        }

        if stuck.is_empty() {
            Ok(())
        } else {
            warn!(actors = ?stuck, "actors missed the stop deadline");
            Err(ActorError::StopTimeout(stuck))
        }
    }
}

fn report(hook: &Option<SupervisorHook>, event: ActorEvent) {
    if let Some(hook) = hook {
        hook(event);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

enum Dispatch {
    Continue,
    Panicked(String),
}

async fn dispatch<A: Actor>(
    actor: &mut A,
    msg: A::Message,
    ctx: &ActorContext,
    hook: &Option<SupervisorHook>,
) -> Dispatch {
    match AssertUnwindSafe(actor.handle(msg, ctx)).catch_unwind().await {
        Ok(Ok(())) => Dispatch::Continue,
        Ok(Err(e)) => {
            warn!(actor = ctx.name(), error = %e, "actor handler failed");
            report(
                hook,
                ActorEvent::HandlerFailed {
                    actor: ctx.name().to_string(),
                    error: e.to_string(),
                },
            );
            Dispatch::Continue
        }
        Err(payload) => Dispatch::Panicked(panic_message(payload.as_ref())),
    }
}

/// Close the mailbox after a panic and drop whatever is still queued.
fn abandon<M>(
    rx: &mut mpsc::Receiver<M>,
    ctx: &ActorContext,
    hook: &Option<SupervisorHook>,
    message: String,
) {
    rx.close();
    let mut discarded = 0;
    while rx.try_recv().is_ok() {
        discarded += 1;
    }
    error!(actor = ctx.name(), %message, discarded, "actor panicked, stopping it");
    report(
        hook,
        ActorEvent::Panicked {
            actor: ctx.name().to_string(),
            message,
            discarded,
        },
    );
}

async fn run_actor<A: Actor>(
    mut actor: A,
    mut rx: mpsc::Receiver<A::Message>,
    ctx: ActorContext,
    hook: Option<SupervisorHook>,
) {
    actor.on_start(&ctx).await;

    loop {
        let msg = tokio::select! {
            biased;
            _ = ctx.cancellation().cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        if let Dispatch::Panicked(message) = dispatch(&mut actor, msg, &ctx, &hook).await {
            abandon(&mut rx, &ctx, &hook, message);
            return;
        }
    }

    // Graceful stop: refuse new messages but finish the ones already queued.
    rx.close();
    while let Some(msg) = rx.recv().await {
        if let Dispatch::Panicked(message) = dispatch(&mut actor, msg, &ctx, &hook).await {
            abandon(&mut rx, &ctx, &hook, message);
            return;
        }
    }
    actor.on_stop().await;
    debug!(actor = ctx.name(), "actor stopped");
    report(
        &hook,
        ActorEvent::Stopped {
            actor: ctx.name().to_string(),
        },
    );
}
