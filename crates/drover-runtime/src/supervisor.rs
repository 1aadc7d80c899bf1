//! Tool execution supervisor.
//!
//! Every call runs on its own task so a slow tool never blocks the mailbox.
//! While the tool works, a heartbeat emits progress events; the first of
//! {result, cancellation} decides what the caller gets back, and exactly one
//! [`ToolResult`] is always produced.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use drover_actor::{Actor, ActorContext, ActorRef};
use drover_core::{ToolCall, ToolExecutor, ToolResult};
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::authorizer::AuthorizerMsg;
use crate::events::{TurnEvent, emit};

const SPINNER: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

/// One tool call to run.
pub struct ExecuteRequest {
    pub call: ToolCall,
    /// Skip the authorization check; the caller already has approval.
    pub approved: bool,
    /// Where heartbeat progress goes, if anywhere.
    pub progress: Option<mpsc::Sender<TurnEvent>>,
    pub cancel: CancellationToken,
}

impl ExecuteRequest {
    pub fn approved(call: ToolCall, cancel: CancellationToken) -> Self {
        Self {
            call,
            approved: true,
            progress: None,
            cancel,
        }
    }

    pub fn unapproved(call: ToolCall, cancel: CancellationToken) -> Self {
        Self {
            approved: false,
            ..Self::approved(call, cancel)
        }
    }

    pub fn with_progress(mut self, events: mpsc::Sender<TurnEvent>) -> Self {
        self.progress = Some(events);
        self
    }
}

/// State of a call detached into the background.
#[derive(Debug, Clone)]
pub enum BackgroundStatus {
    Running,
    Finished(ToolResult),
}

pub enum SupervisorMsg {
    Execute {
        request: ExecuteRequest,
        reply: oneshot::Sender<ToolResult>,
    },
    /// Poll a detached call. A finished result is handed out once.
    TakeBackground {
        call_id: String,
        reply: oneshot::Sender<Option<BackgroundStatus>>,
    },
}

/// How long a finished background result waits to be collected by default.
pub const DEFAULT_BACKGROUND_TTL: Duration = Duration::from_secs(30 * 60);

struct BackgroundJob {
    status: BackgroundStatus,
    finished_at: Option<Instant>,
}

/// Detached calls by id. Finished results that nobody collects within `ttl`
/// are dropped the next time the table is touched.
#[derive(Clone)]
struct BackgroundJobs {
    jobs: Arc<Mutex<HashMap<String, BackgroundJob>>>,
    ttl: Duration,
}

impl BackgroundJobs {
    fn new(ttl: Duration) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    fn evict_expired(&self, jobs: &mut HashMap<String, BackgroundJob>) {
        let before = jobs.len();
        jobs.retain(|_, job| job.finished_at.is_none_or(|at| at.elapsed() < self.ttl));
        if jobs.len() < before {
            debug!(evicted = before - jobs.len(), "dropped uncollected background results");
        }
    }

    fn start(&self, call_id: &str) {
        let mut jobs = self.jobs.lock();
        self.evict_expired(&mut jobs);
        jobs.insert(
            call_id.to_string(),
            BackgroundJob {
                status: BackgroundStatus::Running,
                finished_at: None,
            },
        );
    }

    fn finish(&self, call_id: String, result: ToolResult) {
        let mut jobs = self.jobs.lock();
        self.evict_expired(&mut jobs);
        jobs.insert(
            call_id,
            BackgroundJob {
                status: BackgroundStatus::Finished(result),
                finished_at: Some(Instant::now()),
            },
        );
    }

    /// A finished result is handed out once; a running job stays registered.
    fn take(&self, call_id: &str) -> Option<BackgroundStatus> {
        let mut jobs = self.jobs.lock();
        self.evict_expired(&mut jobs);
        let finished = jobs.get(call_id)?.finished_at.is_some();
        if finished {
            jobs.remove(call_id).map(|job| job.status)
        } else {
            Some(BackgroundStatus::Running)
        }
    }
}

pub struct SupervisorActor {
    executor: Arc<dyn ToolExecutor>,
    authorizer: ActorRef<AuthorizerMsg>,
    heartbeat: Duration,
    background: BackgroundJobs,
}

impl SupervisorActor {
    pub fn new(executor: Arc<dyn ToolExecutor>, authorizer: ActorRef<AuthorizerMsg>, heartbeat: Duration) -> Self {
        Self {
            executor,
            authorizer,
            heartbeat: heartbeat.max(Duration::from_millis(1)),
            background: BackgroundJobs::new(DEFAULT_BACKGROUND_TTL),
        }
    }

    /// Keep uncollected background results for `ttl` after they finish.
    pub fn with_background_ttl(mut self, ttl: Duration) -> Self {
        self.background = BackgroundJobs::new(ttl);
        self
    }
}

#[async_trait]
impl Actor for SupervisorActor {
    type Message = SupervisorMsg;

    async fn handle(&mut self, msg: SupervisorMsg, _ctx: &ActorContext) -> drover_core::Result<()> {
        match msg {
            SupervisorMsg::Execute { request, reply } => {
                let executor = Arc::clone(&self.executor);
                let authorizer = self.authorizer.clone();
                let heartbeat = self.heartbeat;
                let background = self.background.clone();
                tokio::spawn(async move {
                    let result = if request.approved {
                        supervise(executor, request, heartbeat, background).await
                    } else {
                        authorize_then_supervise(executor, authorizer, request, heartbeat, background).await
                    };
                    let _ = reply.send(result);
                });
            }
            SupervisorMsg::TakeBackground { call_id, reply } => {
                let _ = reply.send(self.background.take(&call_id));
            }
        }
        Ok(())
    }
}

/// Run `request` through the supervisor. Mailbox and reply failures become
/// error results, so the caller always gets exactly one [`ToolResult`].
pub async fn execute(supervisor: &ActorRef<SupervisorMsg>, request: ExecuteRequest) -> ToolResult {
    let call_id = request.call.id.clone();
    supervisor
        .ask(|reply| SupervisorMsg::Execute { request, reply })
        .await
        .unwrap_or_else(|e| ToolResult::error(call_id, format!("Error: tool supervisor unavailable: {e}")))
}

/// Fetch the state of a call that was moved to the background.
pub async fn take_background_result(
    supervisor: &ActorRef<SupervisorMsg>,
    call_id: &str,
) -> Option<BackgroundStatus> {
    let call_id = call_id.to_string();
    supervisor
        .ask(|reply| SupervisorMsg::TakeBackground { call_id, reply })
        .await
        .ok()
        .flatten()
}

async fn authorize_then_supervise(
    executor: Arc<dyn ToolExecutor>,
    authorizer: ActorRef<AuthorizerMsg>,
    request: ExecuteRequest,
    heartbeat: Duration,
    background: BackgroundJobs,
) -> ToolResult {
    let call_id = request.call.id.clone();
    let tool_name = request.call.tool_name.clone();
    let params = request.call.arguments.clone();
    let asked = authorizer.ask(|reply| AuthorizerMsg::Authorize {
        tool_name,
        params,
        reply,
    });
    let decision = tokio::select! {
        biased;
        _ = request.cancel.cancelled() => return ToolResult::error(call_id, "execution cancelled"),
        decision = asked => decision,
    };
    match decision {
        Ok(d) if d.allowed => supervise(executor, request, heartbeat, background).await,
        Ok(d) if d.requires_user_input => ToolResult::needs_approval(call_id, d.reason, d.suggested_scope),
        Ok(d) => ToolResult::error(call_id, format!("Authorization denied: {}", d.reason)),
        Err(e) => ToolResult::error(call_id, format!("Error: authorization unavailable: {e}")),
    }
}

async fn supervise(
    executor: Arc<dyn ToolExecutor>,
    request: ExecuteRequest,
    heartbeat: Duration,
    background: BackgroundJobs,
) -> ToolResult {
    let ExecuteRequest {
        call,
        progress,
        cancel,
        ..
    } = request;

    let (result_tx, mut result_rx) = oneshot::channel();
    let worker_call = call.clone();
    tokio::spawn(async move {
        let outcome = AssertUnwindSafe(executor.execute(&worker_call)).catch_unwind().await;
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => ToolResult::error(&worker_call.id, format!("Error: {e}")),
            Err(panic) => ToolResult::error(
                &worker_call.id,
                format!("Error: tool panicked: {}", panic_message(panic.as_ref())),
            ),
        };
        let _ = result_tx.send(result);
    });

    let started = Instant::now();
    let mut ticker = tokio::time::interval_at(started + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut frame = 0usize;

    loop {
        tokio::select! {
            biased;
            outcome = &mut result_rx => {
                return match outcome {
                    Ok(mut result) => {
                        result.tool_call_id = call.id.clone();
                        debug!(tool = %call.tool_name, is_error = result.is_error, "tool finished");
                        result
                    }
                    Err(_) => ToolResult::error(&call.id, "Error: tool worker exited without a result"),
                };
            }
            _ = cancel.cancelled() => {
                if call.args().bool_or("run_in_background", false) {
                    return detach(&call, result_rx, &background);
                }
                warn!(tool = %call.tool_name, id = %call.id, "tool execution cancelled");
                return ToolResult::error(&call.id, "execution cancelled");
            }
            _ = ticker.tick() => {
                if let Some(events) = &progress {
                    emit(events, TurnEvent::Progress {
                        tool_call_id: call.id.clone(),
                        tool_name: call.tool_name.clone(),
                        elapsed_ms: started.elapsed().as_millis() as u64,
                        indicator: SPINNER[frame % SPINNER.len()],
                    })
                    .await;
                }
                frame += 1;
            }
        }
    }
}

/// Leave the worker running and park its eventual result for later retrieval.
fn detach(call: &ToolCall, result_rx: oneshot::Receiver<ToolResult>, background: &BackgroundJobs) -> ToolResult {
    info!(tool = %call.tool_name, id = %call.id, "moving tool call to the background");
    background.start(&call.id);

    let jobs = background.clone();
    let call_id = call.id.clone();
    tokio::spawn(async move {
        let mut result = result_rx
            .await
            .unwrap_or_else(|_| ToolResult::error(&call_id, "Error: tool worker exited without a result"));
        result.tool_call_id = call_id.clone();
        info!(id = %call_id, is_error = result.is_error, "background tool call finished");
        jobs.finish(call_id, result);
    });

    ToolResult::success(
        &call.id,
        format!(
            "Moved to background as job {}. The result can be retrieved later by this call id.",
            call.id
        ),
    )
    .with_data(json!({ "background_job": call.id }))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
