//! The turn loop.
//!
//! ```text
//!   prompt ─► Thinking ──(tool calls)──► Authorizing ─► Executing ─┐
//!                ▲  │                                               │
//!                │  └──(no tool calls)──► AutoContinue? ─► Done     │
//!                └──────────────────────────────────────────────────┘
//! ```
//!
//! A turn suspends on the completion stream, authorization, user approval and
//! tool execution. Each of those waits is raced against the turn's
//! cancellation token.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use drover_actor::{ActorEvent, ActorRef, ActorSystem};
use drover_autonomy::{
    ApprovalHandler, AuthorizationEngine, ContinuationJudge, ErrorJudge, ErrorJudgeDecision,
    FragmentBuffer, HeuristicContinuationJudge, HeuristicErrorJudge, LocalFs, LoopCheck, LoopDetector,
    ModelContinuationJudge, ModelErrorJudge, PATH_KEYS, PathProbe, heuristic_decision, normalize_path,
};
use drover_config::DroverConfig;
use drover_core::{
    DroverError, Message, Result, Role, Session, SharedSession, Tool, ToolCall, ToolExecutor, ToolResult,
};
use drover_llm::{LlmProvider, LlmRequest, StopReason, StreamChunk, Usage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::authorizer::{AuthorizerActor, AuthorizerMsg};
use crate::compaction::{CompactionOutcome, Compactor};
use crate::context::{ContextUsage, truncate_tool_result};
use crate::events::{TurnEvent, emit};
use crate::judge::{JudgeActor, JudgeMsg};
use crate::supervisor::{self, BackgroundStatus, ExecuteRequest, SupervisorActor, SupervisorMsg};

/// Tools whose successful output is remembered as the file's last-seen content.
const READ_TRACKED_TOOLS: &[&str] = &["read_file", "view_file"];

const TRUNCATED_NUDGE: &str = "[SYSTEM: Your previous response was truncated because it exceeded the output token limit. \
Continue exactly where you left off. Do NOT repeat what you already said or re-explain. \
Just keep going with the next tool calls or remaining work.]";

const INCOMPLETE_NUDGE: &str = "[SYSTEM: You stopped but the task is NOT complete. Do NOT describe what could be done, \
actually DO it. Use your tools to finish the remaining work. Continue working now.]";

/// Builds the system prompt from the advertised tools.
pub type SystemPromptFn = Arc<dyn Fn(&[Tool]) -> String + Send + Sync>;

/// How a turn ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed { iterations: u32 },
    /// Stopped early because output or tool calls started repeating.
    LoopDetected { pattern: String, repeat_count: usize },
    /// Ran out of iterations before the model finished.
    IterationLimit { iterations: u32 },
    Cancelled,
}

struct Completion {
    text: String,
    tool_calls: Vec<ToolCall>,
    stop_reason: StopReason,
    usage: Usage,
    repeated: Option<LoopCheck>,
}

pub struct OrchestratorBuilder {
    config: DroverConfig,
    provider: Arc<dyn LlmProvider>,
    tools: Arc<dyn ToolExecutor>,
    session: Option<SharedSession>,
    probe: Option<Arc<dyn PathProbe>>,
    judge_provider: Option<Arc<dyn LlmProvider>>,
    error_judge: Option<Arc<dyn ErrorJudge>>,
    continuation: Option<Arc<dyn ContinuationJudge>>,
    system_prompt: Option<SystemPromptFn>,
}

impl OrchestratorBuilder {
    pub fn session(mut self, session: SharedSession) -> Self {
        self.session = Some(session);
        self
    }

    pub fn path_probe(mut self, probe: Arc<dyn PathProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Provider used for judge calls when `judge.use_model` is set.
    /// Defaults to the main provider.
    pub fn judge_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.judge_provider = Some(provider);
        self
    }

    pub fn error_judge(mut self, judge: Arc<dyn ErrorJudge>) -> Self {
        self.error_judge = Some(judge);
        self
    }

    pub fn continuation_judge(mut self, judge: Arc<dyn ContinuationJudge>) -> Self {
        self.continuation = Some(judge);
        self
    }

    pub fn system_prompt(mut self, build: SystemPromptFn) -> Self {
        self.system_prompt = Some(build);
        self
    }

    /// Spawn the actors and assemble the orchestrator. Must be called from
    /// within a tokio runtime.
    pub fn build(self) -> Orchestrator {
        let config = self.config;
        let session = self.session.unwrap_or_else(|| Session::new().shared());
        let probe: Arc<dyn PathProbe> = match self.probe {
            Some(probe) => probe,
            None => Arc::new(LocalFs),
        };
        let judge_provider = self.judge_provider.unwrap_or_else(|| Arc::clone(&self.provider));
        let judge_model = config.judge.model.clone().unwrap_or_else(|| config.agent.model.clone());

        let error_judge: Arc<dyn ErrorJudge> = match self.error_judge {
            Some(judge) => judge,
            None if config.judge.use_model => Arc::new(ModelErrorJudge::new(
                Arc::clone(&judge_provider),
                judge_model.clone(),
                config.judge.min_sleep_secs,
            )),
            None => Arc::new(HeuristicErrorJudge::new(config.judge.min_sleep_secs)),
        };
        let continuation: Arc<dyn ContinuationJudge> = match self.continuation {
            Some(judge) => judge,
            None if config.judge.use_model => Arc::new(ModelContinuationJudge::new(judge_provider, judge_model)),
            None => Arc::new(HeuristicContinuationJudge),
        };
        let system_prompt: SystemPromptFn = match self.system_prompt {
            Some(build) => build,
            None => Arc::new(default_system_prompt),
        };

        let actors = ActorSystem::new().with_supervisor(Arc::new(log_actor_event));
        let capacity = config.tools.mailbox_capacity;
        let engine = AuthorizationEngine::new(config.authorization.clone(), probe);
        let authorizer = actors.spawn("authorizer", AuthorizerActor::new(engine, Arc::clone(&session)), capacity);
        let supervisor = actors.spawn(
            "tool-supervisor",
            SupervisorActor::new(
                self.tools.clone(),
                authorizer.clone(),
                Duration::from_millis(config.tools.heartbeat_ms),
            )
            .with_background_ttl(Duration::from_secs(config.tools.background_result_ttl_secs)),
            capacity,
        );
        let judge = actors.spawn("error-judge", JudgeActor::new(error_judge), capacity);

        Orchestrator {
            window: config.context_window(),
            workspace_root: config.authorization.workspace_root.clone(),
            loop_detector: LoopDetector::from_config(&config.loop_detection),
            compactor: Arc::new(Compactor::from_config(Arc::clone(&self.provider), &config)),
            system_prompt,
            provider: self.provider,
            tools: self.tools,
            session,
            actors,
            authorizer,
            supervisor,
            judge,
            continuation,
            config,
        }
    }
}

/// Drives turns against one session.
pub struct Orchestrator {
    config: DroverConfig,
    window: usize,
    workspace_root: PathBuf,
    provider: Arc<dyn LlmProvider>,
    tools: Arc<dyn ToolExecutor>,
    session: SharedSession,
    actors: ActorSystem,
    authorizer: ActorRef<AuthorizerMsg>,
    supervisor: ActorRef<SupervisorMsg>,
    judge: ActorRef<JudgeMsg>,
    compactor: Arc<Compactor>,
    continuation: Arc<dyn ContinuationJudge>,
    loop_detector: LoopDetector,
    system_prompt: SystemPromptFn,
}

impl Orchestrator {
    pub fn builder(
        config: DroverConfig,
        provider: Arc<dyn LlmProvider>,
        tools: Arc<dyn ToolExecutor>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            provider,
            tools,
            session: None,
            probe: None,
            judge_provider: None,
            error_judge: None,
            continuation: None,
            system_prompt: None,
        }
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    pub fn config(&self) -> &DroverConfig {
        &self.config
    }

    pub fn compactor(&self) -> &Arc<Compactor> {
        &self.compactor
    }

    /// Drop the conversation and every grant, starting a fresh session id.
    pub fn clear_session(&mut self) {
        self.session.lock().clear();
        self.loop_detector.reset();
    }

    /// Poll a tool call that was moved to the background by cancellation.
    pub async fn take_background_result(&self, call_id: &str) -> Option<BackgroundStatus> {
        supervisor::take_background_result(&self.supervisor, call_id).await
    }

    /// Stop every actor, waiting at most `deadline`.
    pub async fn shutdown(self, deadline: Duration) -> Result<()> {
        self.actors.stop_all(deadline).await.map_err(DroverError::from)
    }

    /// Run one user turn to completion.
    ///
    /// Tool failures and authorization refusals are fed back to the model and
    /// never end the turn. Only a misconfigured provider, a halting error
    /// judgement, or exhausted retries come back as `Err`.
    pub async fn process_prompt(
        &mut self,
        prompt: &str,
        events: &mpsc::Sender<TurnEvent>,
        approval: &dyn ApprovalHandler,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let session_id = {
            let mut session = self.session.lock();
            session.append(Message::text(0, Role::User, prompt));
            session.id()
        };
        self.loop_detector.reset();
        let tools = self.tools.tools();
        let system_prompt = (self.system_prompt)(&tools);
        self.report_context_usage(&system_prompt, events).await;
        info!(session = session_id, tools = tools.len(), "turn started");

        let max_iterations = self.config.agent.max_iterations.max(1);
        let max_auto_continues = self.config.agent.max_auto_continues;
        let mut auto_continues = 0u32;

        for iteration in 1..=max_iterations {
            if cancel.is_cancelled() {
                return Ok(self.cancelled(events).await);
            }
            self.compact_if_needed(&system_prompt, events).await;

            let Some(completion) = self.complete_with_retry(&system_prompt, &tools, events, cancel).await? else {
                return Ok(self.cancelled(events).await);
            };
            debug!(
                iteration,
                input_tokens = completion.usage.input_tokens,
                output_tokens = completion.usage.output_tokens,
                stop = completion.stop_reason.as_str(),
                tool_calls = completion.tool_calls.len(),
                "completion received"
            );
            if !completion.text.is_empty() || !completion.tool_calls.is_empty() {
                self.session.lock().append(Message::assistant(
                    0,
                    completion.text.clone(),
                    completion.tool_calls.clone(),
                ));
            }

            if let Some(check) = completion.repeated {
                return Ok(self.loop_stop(check, events).await);
            }

            if completion.tool_calls.is_empty() {
                if auto_continues < max_auto_continues && completion.stop_reason == StopReason::MaxTokens {
                    auto_continues += 1;
                    info!(iteration, auto_continues, "response truncated, asking the model to continue");
                    self.session
                        .lock()
                        .append(Message::text(0, Role::User, TRUNCATED_NUDGE).synthetic());
                    emit(events, TurnEvent::status("Response was truncated, continuing...")).await;
                    continue;
                }
                if auto_continues < max_auto_continues && !completion.text.trim().is_empty() {
                    let verdict = self.continuation.judge(prompt, &completion.text, iteration).await;
                    if verdict.should_continue {
                        auto_continues += 1;
                        info!(iteration, auto_continues, reason = %verdict.reason, "turn judged incomplete");
                        self.session
                            .lock()
                            .append(Message::text(0, Role::User, INCOMPLETE_NUDGE).synthetic());
                        emit(events, TurnEvent::status(format!("Task not finished ({}), continuing...", verdict.reason)))
                            .await;
                        continue;
                    }
                }
                info!(session = session_id, iterations = iteration, "turn completed");
                emit(events, TurnEvent::Done { iterations: iteration }).await;
                return Ok(TurnOutcome::Completed { iterations: iteration });
            }

            let calls = completion.tool_calls;
            if let Some(repeated) = calls.iter().find(|call| self.loop_detector.record_call(call)) {
                let check = LoopCheck {
                    is_loop: true,
                    pattern: Some(repeated.signature()),
                    repeat_count: self.config.loop_detection.threshold,
                };
                self.skip_calls(&calls, "Not executed: the same tool call kept repeating.");
                return Ok(self.loop_stop(check, events).await);
            }

            for (index, call) in calls.iter().enumerate() {
                if cancel.is_cancelled() {
                    self.skip_calls(&calls[index..], "execution cancelled");
                    return Ok(self.cancelled(events).await);
                }
                let result = self.run_tool_call(call, events, approval, cancel).await;
                self.record_tool_result(call, result, &system_prompt, events).await;
            }
        }

        warn!(session = session_id, max_iterations, "turn stopped at the iteration limit");
        emit(
            events,
            TurnEvent::status(format!("Stopped after {max_iterations} iterations without finishing")),
        )
        .await;
        Ok(TurnOutcome::IterationLimit {
            iterations: max_iterations,
        })
    }

    // ── Completion ─────────────────────────────────────────────

    /// Request a completion, retrying as the error judge decides. `Ok(None)`
    /// means the turn was cancelled.
    async fn complete_with_retry(
        &mut self,
        system_prompt: &str,
        tools: &[Tool],
        events: &mpsc::Sender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> Result<Option<Completion>> {
        let max_attempts = self.config.agent.max_completion_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let request = self.build_request(system_prompt, tools);
            // Fragments from a failed attempt must not count toward a loop.
            let saved_detector = self.loop_detector.clone();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                outcome = self.stream_completion(&request, events) => outcome,
            };
            let err = match outcome {
                Ok(completion) => return Ok(Some(completion)),
                Err(err @ DroverError::ProviderMisconfigured(_)) => return Err(err),
                Err(err) => {
                    self.loop_detector = saved_detector;
                    err
                }
            };

            let error_text = err.to_string();
            let decision = self.judge_error(&error_text, attempt, max_attempts).await;
            if !decision.should_retry || attempt >= max_attempts {
                error!(attempt, error = %error_text, reason = %decision.reason, "completion failed");
                return Err(if attempt >= max_attempts {
                    DroverError::RetriesExhausted {
                        attempts: attempt,
                        last_error: error_text,
                    }
                } else {
                    DroverError::Halted {
                        reason: format!("{}: {error_text}", decision.reason),
                    }
                });
            }

            warn!(attempt, sleep_secs = decision.sleep_seconds, error = %error_text, "completion failed, retrying");
            emit(
                events,
                TurnEvent::Retry {
                    attempt,
                    sleep_secs: decision.sleep_seconds,
                    reason: decision.reason.clone(),
                },
            )
            .await;
            if decision.trigger_compaction {
                self.compact(events).await;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(Duration::from_secs(decision.sleep_seconds)) => {}
            }
        }
    }

    async fn judge_error(&self, error: &str, attempt: u32, max_attempts: u32) -> ErrorJudgeDecision {
        let asked = self
            .judge
            .ask(|reply| JudgeMsg::Judge {
                error: error.to_string(),
                attempt,
                max_attempts,
                model: self.config.agent.model.clone(),
                reply,
            })
            .await;
        asked.unwrap_or_else(|e| {
            warn!(error = %e, "error judge unavailable, using heuristics");
            heuristic_decision(error, attempt, max_attempts, self.config.judge.min_sleep_secs)
        })
    }

    fn build_request(&self, system_prompt: &str, tools: &[Tool]) -> LlmRequest {
        let agent = &self.config.agent;
        LlmRequest {
            model: agent.model.clone(),
            messages: self.session.lock().messages().to_vec(),
            tools: tools.to_vec(),
            system: Some(system_prompt.to_string()),
            max_tokens: agent.max_tokens,
            temperature: agent.temperature,
            stream: true,
        }
    }

    /// Consume one streamed completion, forwarding text and checking it for
    /// repetition sentence by sentence.
    async fn stream_completion(
        &mut self,
        request: &LlmRequest,
        events: &mpsc::Sender<TurnEvent>,
    ) -> Result<Completion> {
        let mut rx = self.provider.stream(request).await?;
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut usage = Usage::default();
        let mut stop_reason = None;
        let mut fragments = FragmentBuffer::new();

        while let Some(chunk) = rx.recv().await {
            match chunk {
                StreamChunk::TextDelta(delta) => {
                    text.push_str(&delta);
                    let fragment = fragments.push(&delta);
                    emit(events, TurnEvent::TextDelta { content: delta }).await;
                    if let Some(check) = fragment.map(|f| self.loop_detector.add_text(&f)).filter(|c| c.is_loop) {
                        return Ok(Completion::repeated(text, usage, check));
                    }
                }
                StreamChunk::ToolCall(call) => tool_calls.push(call),
                StreamChunk::Usage(u) => usage.merge(&u),
                StreamChunk::Done(reason) => {
                    stop_reason = Some(reason);
                    break;
                }
                StreamChunk::Error(e) => return Err(DroverError::LlmProvider(e)),
            }
        }

        let Some(stop_reason) = stop_reason else {
            return Err(DroverError::LlmProvider("stream ended unexpectedly".into()));
        };
        if let Some(check) = fragments.take().map(|f| self.loop_detector.add_text(&f)).filter(|c| c.is_loop) {
            return Ok(Completion::repeated(text, usage, check));
        }
        Ok(Completion {
            text,
            tool_calls,
            stop_reason,
            usage,
            repeated: None,
        })
    }

    // ── Tool calls ─────────────────────────────────────────────

    async fn run_tool_call(
        &self,
        call: &ToolCall,
        events: &mpsc::Sender<TurnEvent>,
        approval: &dyn ApprovalHandler,
        cancel: &CancellationToken,
    ) -> ToolResult {
        emit(
            events,
            TurnEvent::ToolCall {
                id: call.id.clone(),
                name: call.tool_name.clone(),
                args: call.arguments.clone(),
            },
        )
        .await;

        let asked = self.authorizer.ask(|reply| AuthorizerMsg::Authorize {
            tool_name: call.tool_name.clone(),
            params: call.arguments.clone(),
            reply,
        });
        let decision = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ToolResult::error(&call.id, "execution cancelled"),
            decision = asked => decision,
        };
        let decision = match decision {
            Ok(decision) => decision,
            Err(e) => return ToolResult::error(&call.id, format!("Error: authorization unavailable: {e}")),
        };

        if !decision.allowed {
            if !decision.requires_user_input {
                return ToolResult::error(&call.id, format!("Authorization denied: {}", decision.reason));
            }
            emit(
                events,
                TurnEvent::ApprovalRequired {
                    id: call.id.clone(),
                    tool_name: call.tool_name.clone(),
                    tool_args: call.arguments.clone(),
                    reason: decision.reason.clone(),
                },
            )
            .await;
            let approved = tokio::select! {
                biased;
                _ = cancel.cancelled() => return ToolResult::error(&call.id, "execution cancelled"),
                approved = approval.request(
                    &call.tool_name,
                    &call.arguments,
                    &decision.reason,
                    decision.suggested_scope.as_ref(),
                ) => approved,
            };
            if !approved {
                info!(tool = %call.tool_name, "tool call denied by user");
                return ToolResult::error(&call.id, format!("Denied by user: {}", decision.reason));
            }
            if let Some(scope) = decision.suggested_scope {
                if let Err(e) = self.authorizer.ask(|reply| AuthorizerMsg::Grant { scope, reply }).await {
                    warn!(error = %e, "could not persist approved scope");
                }
            }
        }

        let request = ExecuteRequest::approved(call.clone(), cancel.clone()).with_progress(events.clone());
        supervisor::execute(&self.supervisor, request).await
    }

    async fn record_tool_result(
        &self,
        call: &ToolCall,
        mut result: ToolResult,
        system_prompt: &str,
        events: &mpsc::Sender<TurnEvent>,
    ) {
        self.track_read(call, &result);
        result.content = truncate_tool_result(&result.content, self.config.agent.tool_result_max_tokens);
        emit(
            events,
            TurnEvent::ToolResult {
                id: result.tool_call_id.clone(),
                name: call.tool_name.clone(),
                content: result.content.clone(),
                is_error: result.is_error,
            },
        )
        .await;
        self.session
            .lock()
            .append(Message::tool_result(0, &call.tool_name, &result));
        self.report_context_usage(system_prompt, events).await;
    }

    fn track_read(&self, call: &ToolCall, result: &ToolResult) {
        if result.is_error || !READ_TRACKED_TOOLS.contains(&call.tool_name.as_str()) {
            return;
        }
        if let Some(raw) = call.args().path(PATH_KEYS) {
            let path = normalize_path(&self.workspace_root, &raw);
            debug!(path = %path.display(), "recording file read");
            self.session.lock().track_file_read(path, result.content.clone());
        }
    }

    /// Answer calls that will not run, so every requested call has a result.
    fn skip_calls(&self, calls: &[ToolCall], reason: &str) {
        let mut session = self.session.lock();
        for call in calls {
            session.append(Message::tool_result(0, &call.tool_name, &ToolResult::error(&call.id, reason)));
        }
    }

    // ── Context ────────────────────────────────────────────────

    async fn report_context_usage(&self, system_prompt: &str, events: &mpsc::Sender<TurnEvent>) -> ContextUsage {
        let usage = {
            let session = self.session.lock();
            ContextUsage::measure(session.messages(), Some(system_prompt), self.window)
        };
        emit(
            events,
            TurnEvent::ContextUsage {
                used_tokens: usage.used_tokens,
                window: usage.window,
                free_percent: usage.free_percent(),
            },
        )
        .await;
        usage
    }

    async fn compact_if_needed(&self, system_prompt: &str, events: &mpsc::Sender<TurnEvent>) {
        let usage = {
            let session = self.session.lock();
            ContextUsage::measure(session.messages(), Some(system_prompt), self.window)
        };
        if usage.needs_compaction(self.config.agent.compaction_threshold) {
            info!(used = usage.used_tokens, window = usage.window, "context nearly full");
            if self.compact(events).await {
                self.report_context_usage(system_prompt, events).await;
            }
        }
    }

    async fn compact(&self, events: &mpsc::Sender<TurnEvent>) -> bool {
        match self.compactor.compact(&self.session).await {
            CompactionOutcome::Compacted {
                messages_before,
                messages_after,
            } => {
                emit(
                    events,
                    TurnEvent::Compacted {
                        messages_before,
                        messages_after,
                    },
                )
                .await;
                true
            }
            outcome => {
                debug!(?outcome, "no compaction applied");
                false
            }
        }
    }

    // ── Endings ────────────────────────────────────────────────

    async fn loop_stop(&self, check: LoopCheck, events: &mpsc::Sender<TurnEvent>) -> TurnOutcome {
        let pattern = check.pattern.unwrap_or_default();
        warn!(pattern = %pattern, repeats = check.repeat_count, "repetition detected, stopping turn");
        emit(
            events,
            TurnEvent::LoopDetected {
                pattern: pattern.clone(),
                repeat_count: check.repeat_count,
            },
        )
        .await;
        TurnOutcome::LoopDetected {
            pattern,
            repeat_count: check.repeat_count,
        }
    }

    async fn cancelled(&self, events: &mpsc::Sender<TurnEvent>) -> TurnOutcome {
        info!("turn cancelled");
        emit(events, TurnEvent::status("Cancelled")).await;
        TurnOutcome::Cancelled
    }
}

impl Completion {
    fn repeated(text: String, usage: Usage, check: LoopCheck) -> Self {
        Self {
            text,
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
            usage,
            repeated: Some(check),
        }
    }
}

fn default_system_prompt(tools: &[Tool]) -> String {
    let mut prompt = String::from(
        "You are a coding agent working in the user's workspace. Use your tools to inspect and change \
         files, run commands and look things up. Read a file before you edit it, and finish the whole \
         task before you stop.",
    );
    if !tools.is_empty() {
        prompt.push_str("\n\nAvailable tools:\n");
        for tool in tools {
            prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        }
    }
    prompt
}

fn log_actor_event(event: ActorEvent) {
    match event {
        ActorEvent::HandlerFailed { actor, error } => warn!(%actor, %error, "actor handler failed"),
        ActorEvent::Panicked {
            actor,
            message,
            discarded,
        } => error!(%actor, %message, discarded, "actor panicked and was stopped"),
        ActorEvent::Stopped { actor } => debug!(%actor, "actor stopped"),
    }
}
