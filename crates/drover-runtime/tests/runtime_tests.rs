#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use drover_actor::{ActorRef, ActorSystem};
    use drover_autonomy::{AuthorizationEngine, FnApprovalHandler, LocalFs};
    use drover_config::{AuthorizationConfig, DroverConfig};
    use drover_core::{
        AuthScope, DroverError, Message, MessageContent, Role, Session, SharedSession, Tool, ToolCall,
        ToolExecutor, ToolResult,
    };
    use drover_llm::{MockProvider, MockResponse, StopReason};
    use drover_runtime::supervisor::{self, BackgroundStatus, ExecuteRequest, SupervisorMsg};
    use drover_runtime::{
        AuthorizerActor, CompactionOutcome, Compactor, Orchestrator, SupervisorActor, TurnEvent, TurnOutcome,
    };
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    /// Tools backed by a real directory, plus a few misbehaving ones.
    struct WorkspaceTools {
        root: PathBuf,
        executed: AtomicUsize,
    }

    impl WorkspaceTools {
        fn new(root: &Path) -> Arc<Self> {
            Arc::new(Self {
                root: root.to_path_buf(),
                executed: AtomicUsize::new(0),
            })
        }

        fn executed(&self) -> usize {
            self.executed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ToolExecutor for WorkspaceTools {
        fn tools(&self) -> Vec<Tool> {
            ["read_file", "write_file", "list_files", "run_command", "sleep", "explode"]
                .iter()
                .map(|name| Tool {
                    name: name.to_string(),
                    description: format!("test tool {name}"),
                    parameters: json!({"type": "object"}),
                    is_mutating: *name == "write_file",
                })
                .collect()
        }

        async fn execute(&self, call: &ToolCall) -> drover_core::Result<ToolResult> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            let args = call.args();
            match call.tool_name.as_str() {
                "read_file" => {
                    let content = std::fs::read_to_string(self.root.join(args.string_or("path", "")))?;
                    Ok(ToolResult::success(&call.id, content))
                }
                "write_file" => {
                    std::fs::write(self.root.join(args.string_or("path", "")), args.string_or("content", ""))?;
                    Ok(ToolResult::success(&call.id, "file written"))
                }
                "list_files" => Ok(ToolResult::success(&call.id, "notes.txt")),
                "run_command" => Ok(ToolResult::success(
                    &call.id,
                    format!("ran {}", args.string_or("command", "")),
                )),
                "sleep" => {
                    tokio::time::sleep(Duration::from_secs(args.u64_or("secs", 1))).await;
                    // Deliberately wrong id: the supervisor must restore it.
                    Ok(ToolResult::success("placeholder-id", "slept"))
                }
                "explode" => panic!("tool blew up"),
                other => Err(DroverError::ToolNotFound(other.to_string())),
            }
        }
    }

    fn event_channel() -> (mpsc::Sender<TurnEvent>, mpsc::Receiver<TurnEvent>) {
        mpsc::channel(1024)
    }

    fn drain(rx: &mut mpsc::Receiver<TurnEvent>) -> Vec<TurnEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn config_for(root: &Path) -> DroverConfig {
        let mut config = DroverConfig::default();
        config.authorization.workspace_root = root.to_path_buf();
        config
    }

    fn approve_all() -> FnApprovalHandler<impl Fn(&str, &serde_json::Value, &str) -> bool + Send + Sync> {
        FnApprovalHandler(|_: &str, _: &serde_json::Value, _: &str| true)
    }

    fn tool_results(session: &SharedSession) -> Vec<(String, String, bool)> {
        session
            .lock()
            .messages()
            .iter()
            .flat_map(|m| m.content.iter())
            .filter_map(|c| match c {
                MessageContent::ToolResult {
                    tool_call_id,
                    content,
                    is_error,
                    ..
                } => Some((tool_call_id.clone(), content.clone(), *is_error)),
                _ => None,
            })
            .collect()
    }

    // ── Tool supervision ───────────────────────────────────────

    mod supervision {
        use super::*;

        fn spawn_supervisor(
            system: &ActorSystem,
            tools: Arc<WorkspaceTools>,
            config: AuthorizationConfig,
        ) -> ActorRef<SupervisorMsg> {
            let engine = AuthorizationEngine::new(config, Arc::new(LocalFs));
            let authorizer = system.spawn("authorizer", AuthorizerActor::new(engine, Session::new().shared()), 16);
            system.spawn(
                "tool-supervisor",
                SupervisorActor::new(tools, authorizer, Duration::from_millis(500)),
                16,
            )
        }

        fn allow_all() -> AuthorizationConfig {
            AuthorizationConfig {
                dangerously_allow_all: true,
                ..Default::default()
            }
        }

        #[tokio::test(start_paused = true)]
        async fn test_heartbeat_while_tool_runs() {
            let dir = tempfile::tempdir().unwrap();
            let system = ActorSystem::new();
            let sup = spawn_supervisor(&system, WorkspaceTools::new(dir.path()), allow_all());
            let (tx, mut rx) = event_channel();

            let call = ToolCall::new("call-1", "sleep", json!({"secs": 2}));
            let request = ExecuteRequest::approved(call, CancellationToken::new()).with_progress(tx);
            let result = supervisor::execute(&sup, request).await;

            assert!(!result.is_error);
            assert_eq!(result.content, "slept");
            assert_eq!(result.tool_call_id, "call-1");

            let indicators: Vec<char> = drain(&mut rx)
                .into_iter()
                .filter_map(|e| match e {
                    TurnEvent::Progress { indicator, tool_call_id, .. } => {
                        assert_eq!(tool_call_id, "call-1");
                        Some(indicator)
                    }
                    _ => None,
                })
                .collect();
            assert!(indicators.len() >= 3, "got {} heartbeats", indicators.len());
            assert_ne!(indicators[0], indicators[1]);
        }

        #[tokio::test]
        async fn test_fast_tool_has_no_heartbeat() {
            let dir = tempfile::tempdir().unwrap();
            let system = ActorSystem::new();
            let sup = spawn_supervisor(&system, WorkspaceTools::new(dir.path()), allow_all());
            let (tx, mut rx) = event_channel();

            let call = ToolCall::new("c", "list_files", json!({}));
            let result = supervisor::execute(&sup, ExecuteRequest::approved(call, CancellationToken::new()).with_progress(tx)).await;
            assert_eq!(result.content, "notes.txt");
            assert!(drain(&mut rx).is_empty());
        }

        #[tokio::test(start_paused = true)]
        async fn test_cancel_returns_promptly() {
            let dir = tempfile::tempdir().unwrap();
            let system = ActorSystem::new();
            let sup = spawn_supervisor(&system, WorkspaceTools::new(dir.path()), allow_all());
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                trigger.cancel();
            });

            let started = tokio::time::Instant::now();
            let call = ToolCall::new("c", "sleep", json!({"secs": 3600}));
            let result = supervisor::execute(&sup, ExecuteRequest::approved(call, cancel)).await;

            assert!(started.elapsed() < Duration::from_secs(1));
            assert!(result.is_error);
            assert_eq!(result.content, "execution cancelled");
            assert_eq!(result.tool_call_id, "c");
        }

        #[tokio::test(start_paused = true)]
        async fn test_background_detach_on_cancel() {
            let dir = tempfile::tempdir().unwrap();
            let system = ActorSystem::new();
            let sup = spawn_supervisor(&system, WorkspaceTools::new(dir.path()), allow_all());
            let cancel = CancellationToken::new();
            cancel.cancel();

            let call = ToolCall::new("bg-1", "sleep", json!({"secs": 10, "run_in_background": true}));
            let result = supervisor::execute(&sup, ExecuteRequest::approved(call, cancel)).await;
            assert!(!result.is_error);
            assert!(result.content.contains("background"));
            assert_eq!(result.data, Some(json!({"background_job": "bg-1"})));

            assert!(matches!(
                supervisor::take_background_result(&sup, "bg-1").await,
                Some(BackgroundStatus::Running)
            ));

            tokio::time::sleep(Duration::from_secs(11)).await;
            match supervisor::take_background_result(&sup, "bg-1").await {
                Some(BackgroundStatus::Finished(result)) => {
                    assert_eq!(result.content, "slept");
                    assert_eq!(result.tool_call_id, "bg-1");
                }
                other => panic!("expected finished job, got {other:?}"),
            }
            assert!(supervisor::take_background_result(&sup, "bg-1").await.is_none());
        }

        #[tokio::test(start_paused = true)]
        async fn test_uncollected_background_result_expires() {
            let dir = tempfile::tempdir().unwrap();
            let system = ActorSystem::new();
            let engine = AuthorizationEngine::new(allow_all(), Arc::new(LocalFs));
            let authorizer = system.spawn("authorizer", AuthorizerActor::new(engine, Session::new().shared()), 16);
            let sup = system.spawn(
                "tool-supervisor",
                SupervisorActor::new(WorkspaceTools::new(dir.path()), authorizer, Duration::from_millis(500))
                    .with_background_ttl(Duration::from_secs(60)),
                16,
            );
            let cancel = CancellationToken::new();
            cancel.cancel();

            for id in ["kept", "dropped"] {
                let call = ToolCall::new(id, "sleep", json!({"secs": 1, "run_in_background": true}));
                supervisor::execute(&sup, ExecuteRequest::approved(call, cancel.clone())).await;
            }
            tokio::time::sleep(Duration::from_secs(30)).await;
            assert!(matches!(
                supervisor::take_background_result(&sup, "kept").await,
                Some(BackgroundStatus::Finished(_))
            ));

            tokio::time::sleep(Duration::from_secs(60)).await;
            assert!(supervisor::take_background_result(&sup, "dropped").await.is_none());
        }

        #[tokio::test]
        async fn test_panicking_tool_becomes_error_result() {
            let dir = tempfile::tempdir().unwrap();
            let system = ActorSystem::new();
            let sup = spawn_supervisor(&system, WorkspaceTools::new(dir.path()), allow_all());

            let call = ToolCall::new("boom", "explode", json!({}));
            let result = supervisor::execute(&sup, ExecuteRequest::approved(call, CancellationToken::new())).await;
            assert!(result.is_error);
            assert!(result.content.contains("tool blew up"));

            // The supervisor itself is unaffected.
            let call = ToolCall::new("next", "list_files", json!({}));
            let result = supervisor::execute(&sup, ExecuteRequest::approved(call, CancellationToken::new())).await;
            assert!(!result.is_error);
        }

        #[tokio::test]
        async fn test_tool_error_becomes_error_result() {
            let dir = tempfile::tempdir().unwrap();
            let system = ActorSystem::new();
            let sup = spawn_supervisor(&system, WorkspaceTools::new(dir.path()), allow_all());

            let call = ToolCall::new("r", "read_file", json!({"path": "missing.txt"}));
            let result = supervisor::execute(&sup, ExecuteRequest::approved(call, CancellationToken::new())).await;
            assert!(result.is_error);
            assert!(result.content.starts_with("Error:"));
        }

        #[tokio::test]
        async fn test_unapproved_entry_asks_for_approval() {
            let dir = tempfile::tempdir().unwrap();
            let tools = WorkspaceTools::new(dir.path());
            let system = ActorSystem::new();
            let sup = spawn_supervisor(&system, tools.clone(), AuthorizationConfig::default());

            let call = ToolCall::new("c", "run_command", json!({"command": "rm -rf build"}));
            let result = supervisor::execute(&sup, ExecuteRequest::unapproved(call, CancellationToken::new())).await;
            assert!(result.requires_user_input);
            assert_eq!(result.suggested_scope, Some(AuthScope::CommandPrefix("rm".into())));
            assert_eq!(tools.executed(), 0);

            let call = ToolCall::new("d", "run_command", json!({"command": "ls -la"}));
            let result = supervisor::execute(&sup, ExecuteRequest::unapproved(call, CancellationToken::new())).await;
            assert!(!result.is_error);
            assert_eq!(tools.executed(), 1);
        }

        #[tokio::test]
        async fn test_stopped_supervisor_still_answers() {
            let dir = tempfile::tempdir().unwrap();
            let system = ActorSystem::new();
            let sup = spawn_supervisor(&system, WorkspaceTools::new(dir.path()), allow_all());
            system.stop_all(Duration::from_secs(1)).await.unwrap();

            let call = ToolCall::new("late", "list_files", json!({}));
            let result = supervisor::execute(&sup, ExecuteRequest::approved(call, CancellationToken::new())).await;
            assert!(result.is_error);
            assert_eq!(result.tool_call_id, "late");
        }
    }

    // ── Compaction ─────────────────────────────────────────────

    mod compacting {
        use super::*;

        fn session_with(texts: &[(Role, &str)]) -> SharedSession {
            let session = Session::new().shared();
            for (role, text) in texts {
                session.lock().append(Message::text(0, *role, *text));
            }
            session
        }

        fn six_messages() -> SharedSession {
            session_with(&[
                (Role::User, "set up the project"),
                (Role::Assistant, "created Cargo.toml"),
                (Role::User, "add a parser"),
                (Role::Assistant, "added src/parser.rs"),
                (Role::User, "latest question"),
                (Role::Assistant, "latest answer"),
            ])
        }

        #[tokio::test]
        async fn test_preserves_two_most_recent() {
            let provider = Arc::new(MockProvider::new("mock").with_response("SUMMARY TEXT"));
            let compactor = Compactor::new(provider.clone(), "mock/summary", 2, 1_000);
            let session = six_messages();

            let outcome = compactor.compact(&session).await;
            assert_eq!(
                outcome,
                CompactionOutcome::Compacted {
                    messages_before: 6,
                    messages_after: 3
                }
            );

            let s = session.lock();
            assert_eq!(s.compaction_count(), 1);
            let msgs = s.messages();
            assert_eq!(msgs.len(), 3);
            assert!(msgs[0].synthetic);
            assert_eq!(msgs[0].role, Role::System);
            let summary = msgs[0].text_content();
            assert!(summary.contains("SUMMARY TEXT"));
            assert!(summary.contains("- set up the project"));
            assert_eq!(msgs[1].text_content(), "latest question");
            assert_eq!(msgs[2].text_content(), "latest answer");

            let request = &provider.recorded_requests()[0];
            assert_eq!(request.model, "mock/summary");
            assert!(request.messages[0].text_content().contains("[User]: add a parser"));
        }

        #[tokio::test]
        async fn test_over_budget_prompts_are_condensed() {
            let long_prompt = "please ".repeat(200);
            let session = session_with(&[
                (Role::User, &long_prompt),
                (Role::Assistant, "ok"),
                (Role::User, "recent"),
                (Role::Assistant, "recent answer"),
            ]);
            let provider = Arc::new(MockProvider::new("mock").with_response("summary"));
            let compactor = Compactor::new(provider, "m", 2, 10);

            assert!(compactor.compact(&session).await.compacted());
            let summary = session.lock().messages()[0].text_content();
            assert!(summary.contains("(condensed)"));
            assert!(!summary.contains(&long_prompt));
        }

        #[tokio::test]
        async fn test_falls_back_to_naive_digest() {
            let provider = Arc::new(MockProvider::new("mock").with_error("503 service unavailable"));
            let compactor = Compactor::new(provider, "m", 2, 1_000);
            let session = six_messages();

            assert!(compactor.compact(&session).await.compacted());
            let summary = session.lock().messages()[0].text_content();
            assert!(summary.contains("Condensed transcript (4 messages)"));
            assert!(summary.contains("[Assistant]: created Cargo.toml"));
        }

        #[tokio::test]
        async fn test_short_history_is_left_alone() {
            let provider = Arc::new(MockProvider::new("mock"));
            let compactor = Compactor::new(provider.clone(), "m", 2, 1_000);
            let session = session_with(&[(Role::User, "a"), (Role::Assistant, "b"), (Role::User, "c")]);

            assert_eq!(compactor.compact(&session).await, CompactionOutcome::NothingToCompact);
            assert_eq!(session.lock().len(), 3);
            assert_eq!(provider.request_count(), 0);
        }

        #[tokio::test(start_paused = true)]
        async fn test_concurrent_append_rejects_splice() {
            let provider = Arc::new(
                MockProvider::new("mock")
                    .with_mock_response(MockResponse::text("summary").with_delay(Duration::from_secs(5))),
            );
            let compactor = Arc::new(Compactor::new(provider, "m", 2, 1_000));
            let session = six_messages();

            let task = {
                let compactor = Arc::clone(&compactor);
                let session = Arc::clone(&session);
                tokio::spawn(async move { compactor.compact(&session).await })
            };
            tokio::time::sleep(Duration::from_secs(1)).await;
            session.lock().append(Message::text(0, Role::User, "arrived mid-compaction"));

            assert_eq!(task.await.unwrap(), CompactionOutcome::Conflict);
            let s = session.lock();
            assert_eq!(s.len(), 7);
            assert_eq!(s.compaction_count(), 0);
            assert_eq!(s.messages()[0].text_content(), "set up the project");
            assert!(!compactor.is_running());
        }

        #[tokio::test(start_paused = true)]
        async fn test_single_flight() {
            let provider = Arc::new(
                MockProvider::new("mock")
                    .with_mock_response(MockResponse::text("summary").with_delay(Duration::from_secs(5))),
            );
            let compactor = Arc::new(Compactor::new(provider, "m", 2, 1_000));
            let session = six_messages();

            let task = {
                let compactor = Arc::clone(&compactor);
                let session = Arc::clone(&session);
                tokio::spawn(async move { compactor.compact(&session).await })
            };
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert!(compactor.is_running());
            assert_eq!(compactor.compact(&session).await, CompactionOutcome::Busy);
            assert!(task.await.unwrap().compacted());
        }
    }

    // ── Turns ──────────────────────────────────────────────────

    mod turns {
        use super::*;

        #[tokio::test]
        async fn test_plain_answer_completes() {
            let dir = tempfile::tempdir().unwrap();
            let provider = Arc::new(MockProvider::new("mock").with_response("Hello there."));
            let mut orch =
                Orchestrator::builder(config_for(dir.path()), provider.clone(), WorkspaceTools::new(dir.path())).build();
            let (tx, mut rx) = event_channel();

            let outcome = orch
                .process_prompt("hi", &tx, &approve_all(), &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(outcome, TurnOutcome::Completed { iterations: 1 });

            let session = orch.session().lock();
            assert_eq!(session.len(), 2);
            assert_eq!(session.messages()[1].text_content().trim(), "Hello there.");
            drop(session);

            let events = drain(&mut rx);
            let text: String = events
                .iter()
                .filter_map(|e| match e {
                    TurnEvent::TextDelta { content } => Some(content.as_str()),
                    _ => None,
                })
                .collect();
            assert_eq!(text.trim(), "Hello there.");
            assert!(matches!(events.first(), Some(TurnEvent::ContextUsage { .. })));
            assert_eq!(events.last(), Some(&TurnEvent::Done { iterations: 1 }));

            let request = &provider.recorded_requests()[0];
            assert!(request.stream);
            assert!(request.system.as_deref().is_some_and(|s| s.contains("write_file")));
            assert_eq!(request.tools.len(), 6);
        }

        #[tokio::test]
        async fn test_write_to_unread_file_asks_then_writes() {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("notes.txt"), "old").unwrap();
            let provider = Arc::new(
                MockProvider::new("mock")
                    .with_tool_call("write_file", json!({"path": "notes.txt", "content": "new"}))
                    .with_response("Updated notes.txt."),
            );
            let tools = WorkspaceTools::new(dir.path());
            let mut orch = Orchestrator::builder(config_for(dir.path()), provider, tools.clone()).build();

            let reasons = Arc::new(Mutex::new(Vec::new()));
            let seen = Arc::clone(&reasons);
            let approval = FnApprovalHandler(move |tool: &str, _: &serde_json::Value, reason: &str| {
                seen.lock().push((tool.to_string(), reason.to_string()));
                true
            });
            let (tx, mut rx) = event_channel();

            let outcome = orch
                .process_prompt("write to notes.txt", &tx, &approval, &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(outcome, TurnOutcome::Completed { iterations: 2 });

            let asked = reasons.lock().clone();
            assert_eq!(asked.len(), 1);
            assert_eq!(asked[0].0, "write_file");
            assert!(asked[0].1.contains("read"), "reason: {}", asked[0].1);

            assert_eq!(std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(), "new");
            assert_eq!(tools.executed(), 1);
            let results = tool_results(orch.session());
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].1, "file written");
            assert!(!results[0].2);

            // The approved path is now granted for the rest of the session.
            let granted = orch.session().lock().authorized_paths().count();
            assert_eq!(granted, 1);

            let events = drain(&mut rx);
            assert!(events.iter().any(|e| matches!(e, TurnEvent::ApprovalRequired { .. })));
            assert!(events.iter().any(|e| matches!(e, TurnEvent::ToolResult { is_error: false, .. })));
        }

        #[tokio::test]
        async fn test_read_then_write_needs_no_approval() {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("notes.txt"), "old").unwrap();
            let provider = Arc::new(
                MockProvider::new("mock")
                    .with_tool_call("read_file", json!({"path": "notes.txt"}))
                    .with_tool_call("write_file", json!({"path": "notes.txt", "content": "new"}))
                    .with_response("Done."),
            );
            let mut orch =
                Orchestrator::builder(config_for(dir.path()), provider, WorkspaceTools::new(dir.path())).build();
            let refuse = FnApprovalHandler(|_: &str, _: &serde_json::Value, _: &str| false);
            let (tx, _rx) = event_channel();

            let outcome = orch
                .process_prompt("edit notes", &tx, &refuse, &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(outcome, TurnOutcome::Completed { iterations: 3 });
            assert_eq!(std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(), "new");
            assert!(orch.session().lock().has_read(&dir.path().join("notes.txt")));
        }

        #[tokio::test]
        async fn test_denied_by_user_is_fed_back() {
            let dir = tempfile::tempdir().unwrap();
            let provider = Arc::new(
                MockProvider::new("mock")
                    .with_tool_call("run_command", json!({"command": "rm -rf build"}))
                    .with_response("Understood, I will not delete it."),
            );
            let tools = WorkspaceTools::new(dir.path());
            let mut orch = Orchestrator::builder(config_for(dir.path()), provider, tools.clone()).build();
            let refuse = FnApprovalHandler(|_: &str, _: &serde_json::Value, _: &str| false);
            let (tx, _rx) = event_channel();

            let outcome = orch
                .process_prompt("clean up", &tx, &refuse, &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(outcome, TurnOutcome::Completed { iterations: 2 });
            assert_eq!(tools.executed(), 0);

            let results = tool_results(orch.session());
            assert_eq!(results.len(), 1);
            assert!(results[0].2);
            assert!(results[0].1.starts_with("Denied by user"));
            assert_eq!(orch.session().lock().authorized_commands().count(), 0);
        }

        #[tokio::test]
        async fn test_hard_denial_skips_approval() {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("exists.rs"), "fn main() {}").unwrap();
            let provider = Arc::new(
                MockProvider::new("mock")
                    .with_tool_call("create_file", json!({"path": "exists.rs", "content": ""}))
                    .with_response("That file already exists."),
            );
            let mut orch =
                Orchestrator::builder(config_for(dir.path()), provider, WorkspaceTools::new(dir.path())).build();
            let asked = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&asked);
            let approval = FnApprovalHandler(move |_: &str, _: &serde_json::Value, _: &str| {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            });
            let (tx, _rx) = event_channel();

            orch.process_prompt("create it", &tx, &approval, &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(asked.load(Ordering::SeqCst), 0);
            let results = tool_results(orch.session());
            assert!(results[0].2);
            assert!(results[0].1.starts_with("Authorization denied"));
        }

        #[tokio::test(start_paused = true)]
        async fn test_rate_limit_backoff_then_success() {
            let dir = tempfile::tempdir().unwrap();
            let provider = Arc::new(
                MockProvider::new("mock")
                    .with_error("429 Too Many Requests")
                    .with_error("429 Too Many Requests")
                    .with_response("Recovered."),
            );
            let mut orch =
                Orchestrator::builder(config_for(dir.path()), provider.clone(), WorkspaceTools::new(dir.path())).build();
            let (tx, mut rx) = event_channel();

            let started = tokio::time::Instant::now();
            let outcome = orch
                .process_prompt("hi", &tx, &approve_all(), &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(outcome, TurnOutcome::Completed { iterations: 1 });
            assert_eq!(provider.request_count(), 3);
            assert!(started.elapsed() >= Duration::from_secs(15));

            let sleeps: Vec<(u32, u64)> = drain(&mut rx)
                .into_iter()
                .filter_map(|e| match e {
                    TurnEvent::Retry {
                        attempt, sleep_secs, ..
                    } => Some((attempt, sleep_secs)),
                    _ => None,
                })
                .collect();
            assert_eq!(sleeps, vec![(1, 5), (2, 10)]);
        }

        #[tokio::test]
        async fn test_auth_error_halts_without_retry() {
            let dir = tempfile::tempdir().unwrap();
            let provider = Arc::new(MockProvider::new("mock").with_error("401 unauthorized: invalid api key"));
            let mut orch =
                Orchestrator::builder(config_for(dir.path()), provider.clone(), WorkspaceTools::new(dir.path())).build();
            let (tx, _rx) = event_channel();

            let err = orch
                .process_prompt("hi", &tx, &approve_all(), &CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(err, DroverError::Halted { .. }), "{err}");
            assert_eq!(provider.request_count(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_retries_exhausted() {
            let dir = tempfile::tempdir().unwrap();
            let mut config = config_for(dir.path());
            config.agent.max_completion_attempts = 2;
            let provider = Arc::new(
                MockProvider::new("mock")
                    .with_error("503 service unavailable")
                    .with_error("503 service unavailable"),
            );
            let mut orch = Orchestrator::builder(config, provider, WorkspaceTools::new(dir.path())).build();
            let (tx, _rx) = event_channel();

            let err = orch
                .process_prompt("hi", &tx, &approve_all(), &CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(err, DroverError::RetriesExhausted { attempts: 2, .. }), "{err}");
        }

        #[tokio::test(start_paused = true)]
        async fn test_failed_attempts_do_not_feed_loop_detection() {
            let dir = tempfile::tempdir().unwrap();
            let opening = "I will start by reading the configuration file.\n";
            let provider = Arc::new(
                MockProvider::new("mock")
                    .with_mock_response(MockResponse::chunks([opening]).failing_mid_stream("503 service unavailable"))
                    .with_mock_response(MockResponse::chunks([opening]).failing_mid_stream("503 service unavailable"))
                    .with_mock_response(MockResponse::chunks([opening, "It lists two services."])),
            );
            let mut orch =
                Orchestrator::builder(config_for(dir.path()), provider.clone(), WorkspaceTools::new(dir.path())).build();
            let (tx, _rx) = event_channel();

            let outcome = orch
                .process_prompt("summarize the config", &tx, &approve_all(), &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(outcome, TurnOutcome::Completed { iterations: 1 });
            assert_eq!(provider.request_count(), 3);
            let session = orch.session().lock();
            assert!(session.messages()[1].text_content().ends_with("It lists two services."));
        }

        #[tokio::test(start_paused = true)]
        async fn test_stream_without_done_is_retried() {
            let dir = tempfile::tempdir().unwrap();
            let provider = Arc::new(
                MockProvider::new("mock")
                    .with_mock_response(MockResponse::chunks(["The answer is"]).truncated())
                    .with_response("The answer is 42."),
            );
            let mut orch =
                Orchestrator::builder(config_for(dir.path()), provider.clone(), WorkspaceTools::new(dir.path())).build();
            let (tx, mut rx) = event_channel();

            let outcome = orch
                .process_prompt("what is the answer", &tx, &approve_all(), &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(outcome, TurnOutcome::Completed { iterations: 1 });
            assert_eq!(provider.request_count(), 2);
            assert!(drain(&mut rx).iter().any(|e| matches!(e, TurnEvent::Retry { attempt: 1, .. })));
            let session = orch.session().lock();
            assert_eq!(session.len(), 2);
            assert_eq!(session.messages()[1].text_content().trim(), "The answer is 42.");
        }

        #[tokio::test]
        async fn test_repeated_sentence_stops_turn() {
            let dir = tempfile::tempdir().unwrap();
            let sentence = "Let me re-run the test suite to see what happens. ";
            assert_eq!(sentence.len(), 50);
            let provider = Arc::new(
                MockProvider::new("mock").with_mock_response(MockResponse::chunks(vec![sentence; 4])),
            );
            let mut orch =
                Orchestrator::builder(config_for(dir.path()), provider.clone(), WorkspaceTools::new(dir.path())).build();
            let (tx, mut rx) = event_channel();

            let outcome = orch
                .process_prompt("fix the tests", &tx, &approve_all(), &CancellationToken::new())
                .await
                .unwrap();
            match outcome {
                TurnOutcome::LoopDetected { pattern, repeat_count } => {
                    assert_eq!(repeat_count, 3);
                    assert!(pattern.starts_with("Let me re-run the test suite"));
                }
                other => panic!("expected loop detection, got {other:?}"),
            }
            assert_eq!(provider.request_count(), 1);
            assert!(drain(&mut rx).iter().any(|e| matches!(e, TurnEvent::LoopDetected { .. })));
        }

        #[tokio::test]
        async fn test_repeated_tool_call_stops_turn() {
            let dir = tempfile::tempdir().unwrap();
            let call = ToolCall::new("same", "list_files", json!({"path": "."}));
            let provider = Arc::new(
                MockProvider::new("mock")
                    .with_tool_calls(vec![call.clone()])
                    .with_tool_calls(vec![call.clone()])
                    .with_tool_calls(vec![call]),
            );
            let tools = WorkspaceTools::new(dir.path());
            let mut orch = Orchestrator::builder(config_for(dir.path()), provider, tools.clone()).build();
            let (tx, _rx) = event_channel();

            let outcome = orch
                .process_prompt("look around", &tx, &approve_all(), &CancellationToken::new())
                .await
                .unwrap();
            assert!(matches!(outcome, TurnOutcome::LoopDetected { .. }));
            assert_eq!(tools.executed(), 2);
            // Every requested call still has a result.
            assert_eq!(tool_results(orch.session()).len(), 3);
        }

        #[tokio::test]
        async fn test_iteration_limit_is_reported() {
            let dir = tempfile::tempdir().unwrap();
            let mut config = config_for(dir.path());
            config.agent.max_iterations = 3;
            let provider = Arc::new(
                MockProvider::new("mock")
                    .with_tool_call("list_files", json!({"path": "a"}))
                    .with_tool_call("list_files", json!({"path": "b"}))
                    .with_tool_call("list_files", json!({"path": "c"})),
            );
            let mut orch = Orchestrator::builder(config, provider.clone(), WorkspaceTools::new(dir.path())).build();
            let (tx, mut rx) = event_channel();

            let outcome = orch
                .process_prompt("explore", &tx, &approve_all(), &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(outcome, TurnOutcome::IterationLimit { iterations: 3 });
            assert_eq!(provider.remaining(), 0);
            assert!(drain(&mut rx).iter().any(|e| matches!(
                e,
                TurnEvent::Status { message } if message.contains("3 iterations")
            )));
        }

        #[tokio::test]
        async fn test_truncated_reply_is_continued() {
            let dir = tempfile::tempdir().unwrap();
            let provider = Arc::new(
                MockProvider::new("mock")
                    .with_mock_response(MockResponse::text("Part one").with_stop_reason(StopReason::MaxTokens))
                    .with_response("Part two."),
            );
            let mut orch =
                Orchestrator::builder(config_for(dir.path()), provider.clone(), WorkspaceTools::new(dir.path())).build();
            let (tx, _rx) = event_channel();

            let outcome = orch
                .process_prompt("write a lot", &tx, &approve_all(), &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(outcome, TurnOutcome::Completed { iterations: 2 });

            let session = orch.session().lock();
            let nudge = &session.messages()[2];
            assert!(nudge.synthetic);
            assert_eq!(nudge.role, Role::User);
            assert!(nudge.text_content().contains("truncated"));
            assert_eq!(provider.request_count(), 2);
        }

        #[tokio::test]
        async fn test_deferring_reply_is_continued_once_judged_incomplete() {
            let dir = tempfile::tempdir().unwrap();
            let provider = Arc::new(
                MockProvider::new("mock")
                    .with_response(
                        "I created the parser module. Feel free to extend it, and you can add more cases \
                         for the remaining token kinds as needed later.",
                    )
                    .with_response("Finished."),
            );
            let mut orch =
                Orchestrator::builder(config_for(dir.path()), provider, WorkspaceTools::new(dir.path())).build();
            let (tx, _rx) = event_channel();

            let outcome = orch
                .process_prompt("write the parser", &tx, &approve_all(), &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(outcome, TurnOutcome::Completed { iterations: 2 });
            let session = orch.session().lock();
            assert!(session.messages().iter().any(|m| m.synthetic && m.text_content().contains("NOT complete")));
        }

        #[tokio::test]
        async fn test_cancelled_before_start() {
            let dir = tempfile::tempdir().unwrap();
            let provider = Arc::new(MockProvider::new("mock").with_response("never sent"));
            let mut orch =
                Orchestrator::builder(config_for(dir.path()), provider.clone(), WorkspaceTools::new(dir.path())).build();
            let (tx, _rx) = event_channel();
            let cancel = CancellationToken::new();
            cancel.cancel();

            let outcome = orch.process_prompt("hi", &tx, &approve_all(), &cancel).await.unwrap();
            assert_eq!(outcome, TurnOutcome::Cancelled);
            assert_eq!(provider.request_count(), 0);
        }

        #[tokio::test(start_paused = true)]
        async fn test_cancel_during_tool_answers_every_call() {
            let dir = tempfile::tempdir().unwrap();
            let provider = Arc::new(MockProvider::new("mock").with_tool_calls(vec![
                ToolCall::new("slow", "sleep", json!({"secs": 3600})),
                ToolCall::new("after", "list_files", json!({})),
            ]));
            let mut config = config_for(dir.path());
            config.authorization.dangerously_allow_all = true;
            let tools = WorkspaceTools::new(dir.path());
            let mut orch = Orchestrator::builder(config, provider, tools.clone()).build();
            let (tx, _rx) = event_channel();
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                trigger.cancel();
            });

            let outcome = orch.process_prompt("wait", &tx, &approve_all(), &cancel).await.unwrap();
            assert_eq!(outcome, TurnOutcome::Cancelled);
            let results = tool_results(orch.session());
            assert_eq!(results.len(), 2);
            assert_eq!(results[0].0, "slow");
            assert_eq!(results[0].1, "execution cancelled");
            assert_eq!(results[1].0, "after");
            assert!(results[1].2);
            assert_eq!(tools.executed(), 1);
        }

        #[tokio::test]
        async fn test_large_tool_output_is_truncated() {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("big.txt"), "x".repeat(10_000)).unwrap();
            let mut config = config_for(dir.path());
            config.agent.tool_result_max_tokens = 100;
            let provider = Arc::new(
                MockProvider::new("mock")
                    .with_tool_call("read_file", json!({"path": "big.txt"}))
                    .with_response("It is big."),
            );
            let mut orch = Orchestrator::builder(config, provider, WorkspaceTools::new(dir.path())).build();
            let (tx, _rx) = event_channel();

            orch.process_prompt("read big.txt", &tx, &approve_all(), &CancellationToken::new())
                .await
                .unwrap();
            let results = tool_results(orch.session());
            assert!(results[0].1.len() < 1_000);
            assert!(results[0].1.contains("truncated"));
            // The full content is what the session remembers as read.
            let session = orch.session().lock();
            let remembered = session.read_content(&dir.path().join("big.txt")).unwrap();
            assert_eq!(remembered.len(), 10_000);
        }

        #[tokio::test]
        async fn test_full_context_triggers_compaction() {
            let dir = tempfile::tempdir().unwrap();
            let mut config = config_for(dir.path());
            config.agent.context_window = 400;
            config.agent.compaction_threshold = 0.5;

            let session = Session::new().shared();
            for i in 0..6 {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                session.lock().append(Message::text(0, role, format!("{i} {}", "y".repeat(400))));
            }
            let provider = Arc::new(
                MockProvider::new("mock")
                    .with_response("Earlier: six long messages.")
                    .with_response("Answer."),
            );
            let mut orch = Orchestrator::builder(config, provider, WorkspaceTools::new(dir.path()))
                .session(Arc::clone(&session))
                .build();
            let (tx, mut rx) = event_channel();

            let outcome = orch
                .process_prompt("next step", &tx, &approve_all(), &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(outcome, TurnOutcome::Completed { iterations: 1 });

            let s = session.lock();
            assert_eq!(s.compaction_count(), 1);
            assert!(s.messages()[0].text_content().contains("Earlier: six long messages."));
            assert_eq!(s.messages().last().map(|m| m.text_content().trim().to_string()), Some("Answer.".to_string()));
            drop(s);

            assert!(drain(&mut rx).iter().any(|e| matches!(
                e,
                TurnEvent::Compacted {
                    messages_before: 7,
                    messages_after: 3
                }
            )));
        }

        #[tokio::test]
        async fn test_clear_session_and_shutdown() {
            let dir = tempfile::tempdir().unwrap();
            let provider = Arc::new(MockProvider::new("mock").with_response("ok"));
            let mut orch =
                Orchestrator::builder(config_for(dir.path()), provider, WorkspaceTools::new(dir.path())).build();
            let (tx, _rx) = event_channel();
            orch.process_prompt("hi", &tx, &approve_all(), &CancellationToken::new())
                .await
                .unwrap();

            let old_id = orch.session().lock().id();
            orch.clear_session();
            let session = orch.session().lock();
            assert!(session.is_empty());
            assert!(session.id() > old_id);
            drop(session);

            orch.shutdown(Duration::from_secs(1)).await.unwrap();
        }
    }

    // ── Logging ────────────────────────────────────────────────

    mod logging {
        use drover_config::LoggingConfig;
        use drover_runtime::init_tracing;

        #[test]
        fn test_second_init_is_a_no_op() {
            let config = LoggingConfig {
                level: "debug".into(),
                format: "compact".into(),
            };
            let _ = init_tracing(&config);
            assert!(!init_tracing(&config));
        }
    }

    // ── Events ─────────────────────────────────────────────────

    mod event_format {
        use super::*;

        #[test]
        fn test_events_serialize_tagged() {
            let value = serde_json::to_value(TurnEvent::TextDelta { content: "hi".into() }).unwrap();
            assert_eq!(value, json!({"type": "text", "content": "hi"}));

            let value = serde_json::to_value(TurnEvent::ContextUsage {
                used_tokens: 10,
                window: 100,
                free_percent: 90.0,
            })
            .unwrap();
            assert_eq!(value["type"], "context_usage");
            assert_eq!(value["free_percent"], 90.0);
        }

        #[test]
        fn test_only_progress_is_ephemeral() {
            let progress = TurnEvent::Progress {
                tool_call_id: "c".into(),
                tool_name: "t".into(),
                elapsed_ms: 500,
                indicator: '⠋',
            };
            assert!(progress.is_ephemeral());
            assert!(!TurnEvent::status("x").is_ephemeral());
        }
    }
}
