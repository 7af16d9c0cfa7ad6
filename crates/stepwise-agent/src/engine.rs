//! The run graph: route, then either answer or resolve/plan/segment/execute/
//! finalize.
//!
//! Each stage fills in one part of [`AgentRunState`] and is skipped when that
//! part is already present, so a fresh run and a resumed checkpoint go through
//! the same path.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use stepwise_ai::{Message, SharedPolicy};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::answer::Answerer;
use crate::error::{Error, Result, Stage};
use crate::events::AgentEvent;
use crate::executor::{DEFAULT_MAX_TURNS_PER_STEP, StepExecutor};
use crate::finalizer::{FinalizeOutcome, Finalizer, GitPublisher, Publisher};
use crate::hooks::{CheckpointHook, RunHooks};
use crate::planner::Planner;
use crate::project::{PathFilter, project_tree};
use crate::resolver::{DEFAULT_MAX_ROUNDS, FileContextResolver};
use crate::router::Router;
use crate::segmenter::StepSegmenter;
use crate::state::{AgentRunState, InputType};
use crate::tool::BoxedTool;
use crate::tools::builtin_dispatcher;

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Evaluation rounds for context resolution
    pub max_context_rounds: u32,
    pub max_turns_per_step: u32,
    pub shell_timeout: Duration,
    /// Glob patterns added to the default disallowed set
    pub disallowed_paths: Vec<String>,
    /// Commit and push after the last step. When off, the run records
    /// `FinalizeOutcome::Skipped` without calling the policy.
    pub finalize: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_context_rounds: DEFAULT_MAX_ROUNDS,
            max_turns_per_step: DEFAULT_MAX_TURNS_PER_STEP,
            shell_timeout: Duration::from_secs(120),
            disallowed_paths: Vec::new(),
            finalize: true,
        }
    }
}

/// Stops the run an [`Agent`] is driving. The current tool call is cancelled
/// and the run fails with [`Error::Aborted`] before its next policy turn; the
/// last checkpoint stays resumable.
#[derive(Clone)]
pub struct AbortHandle(Arc<Mutex<CancellationToken>>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.lock().cancel();
    }
}

/// Drives runs end to end
pub struct Agent {
    config: AgentConfig,
    policy: SharedPolicy,
    evaluator: Option<SharedPolicy>,
    publisher: Arc<dyn Publisher>,
    extra_tools: Vec<BoxedTool>,
    event_tx: broadcast::Sender<AgentEvent>,
    checkpoint: Option<CheckpointHook>,
    cancel: Arc<Mutex<CancellationToken>>,
}

impl Agent {
    pub fn new(config: AgentConfig, policy: SharedPolicy) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            policy,
            evaluator: None,
            publisher: Arc::new(GitPublisher),
            extra_tools: Vec::new(),
            event_tx,
            checkpoint: None,
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    /// Use a separate policy for context evaluation rounds
    pub fn with_evaluator(mut self, policy: SharedPolicy) -> Self {
        self.evaluator = Some(policy);
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Register a tool alongside the built-ins for every run
    pub fn add_tool(&mut self, tool: BoxedTool) {
        self.extra_tools.push(tool);
    }

    /// Set a hook that sees the state after every transition.
    pub fn set_checkpoint_hook(&mut self, hook: impl Fn(&AgentRunState) + Send + Sync + 'static) {
        self.checkpoint = Some(Arc::new(hook));
    }

    /// Subscribe to agent events
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    /// Get a handle that aborts the current run from another task
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(self.cancel.clone())
    }

    /// Token for the next run. A token spent by an earlier abort is replaced.
    fn run_token(&self) -> CancellationToken {
        let mut token = self.cancel.lock();
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        token.clone()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn hooks(&self) -> RunHooks {
        let hooks = RunHooks::new().with_events(self.event_tx.clone());
        match &self.checkpoint {
            Some(hook) => hooks.with_checkpoint(hook.clone()),
            None => hooks,
        }
    }

    fn filter(&self) -> Result<PathFilter> {
        PathFilter::with_defaults(&self.config.disallowed_paths)
            .map_err(|e| Error::Input(format!("invalid disallowed path pattern: {e}")))
    }

    /// Start a new run.
    pub async fn run(
        &self,
        task: &str,
        project_path: impl Into<PathBuf>,
        operator_metadata: BTreeMap<String, String>,
    ) -> Result<AgentRunState> {
        if task.trim().is_empty() {
            return Err(Error::Input("task is empty".to_string()));
        }
        let project = check_project(project_path.into())?;
        let state = AgentRunState::new(task.trim(), project, operator_metadata);
        tracing::info!(run_id = %state.run_id, project = %state.project_path.display(), "run started");
        self.drive(state, false).await
    }

    /// Continue a checkpointed run from wherever it stopped.
    pub async fn resume(&self, mut state: AgentRunState) -> Result<AgentRunState> {
        if state.completed {
            return Ok(state);
        }
        state.project_path = check_project(state.project_path.clone())?;
        tracing::info!(run_id = %state.run_id, step = state.current_step_index, "run resumed");
        self.drive(state, true).await
    }

    async fn drive(&self, mut state: AgentRunState, resumed: bool) -> Result<AgentRunState> {
        let hooks = self.hooks();
        let cancel = self.run_token();
        hooks.emit(AgentEvent::RunStart {
            run_id: state.run_id.clone(),
            resumed,
        });

        match self.stages(&mut state, &hooks, &cancel).await {
            Ok(()) => {
                tracing::info!(run_id = %state.run_id, "run complete");
                hooks.emit(AgentEvent::RunEnd {
                    run_id: state.run_id.clone(),
                });
                Ok(state)
            }
            Err(e) => {
                tracing::error!(run_id = %state.run_id, "run failed: {e}");
                hooks.emit(AgentEvent::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn stages(
        &self,
        state: &mut AgentRunState,
        hooks: &RunHooks,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let filter = self.filter()?;
        let run_id_owned = state.run_id.clone();
        let run_id = run_id_owned.as_str();
        let at = |stage: Stage| move |e: Error| e.in_run(run_id, stage, None);
        let live = |stage: Stage| {
            if cancel.is_cancelled() {
                Err(Error::Aborted.in_run(run_id, stage, None))
            } else {
                Ok(())
            }
        };

        if state.project_tree.is_empty() {
            state.project_tree = project_tree(&state.project_path, &filter);
        }

        let input_type = match state.input_type {
            Some(t) => t,
            None => {
                live(Stage::Route)?;
                let t = Router::new(self.policy.clone())
                    .classify(&state.task)
                    .await
                    .map_err(at(Stage::Route))?;
                state.input_type = Some(t);
                state.messages.push(Message::human(state.task.clone()));
                hooks.emit(AgentEvent::Routed { input_type: t });
                hooks.checkpoint(state);
                t
            }
        };

        if input_type == InputType::Question {
            let answer = Answerer::new(self.policy.clone())
                .answer(&state.task, &state.project_tree)
                .await
                .map_err(at(Stage::Answer))?;
            let text = answer.text();
            state.messages.push(answer);
            state.answer = Some(text.clone());
            state.completed = true;
            hooks.emit(AgentEvent::Answered { answer: text });
            hooks.checkpoint(state);
            return Ok(());
        }

        if state.context.is_empty() {
            live(Stage::ResolveContext)?;
            let evaluator = self.evaluator.clone().unwrap_or_else(|| self.policy.clone());
            let resolution = FileContextResolver::new(self.policy.clone(), evaluator)
                .with_filter(filter.clone())
                .with_max_rounds(self.config.max_context_rounds)
                .resolve(&state.task, &state.project_path, &state.project_tree)
                .await
                .map_err(at(Stage::ResolveContext))?;
            state.context = resolution.context;
            state.resolved_paths = resolution.resolved_paths;
            hooks.emit(AgentEvent::ContextResolved {
                paths: state.resolved_paths.clone(),
                outcome: resolution.outcome,
            });
            hooks.checkpoint(state);
        }

        if state.plan.is_none() {
            live(Stage::Plan)?;
            let plan = Planner::new(self.policy.clone())
                .plan(&state.task, &state.context, &state.operator_metadata)
                .await
                .map_err(at(Stage::Plan))?;
            state.plan = Some(plan.clone());
            hooks.emit(AgentEvent::PlanReady { plan });
            hooks.checkpoint(state);
        }

        if state.steps.is_empty() {
            live(Stage::Segment)?;
            let plan = state.plan.clone().unwrap_or_default();
            state.steps = StepSegmenter::new(self.policy.clone())
                .segment(&plan, &state.operator_metadata)
                .await
                .map_err(at(Stage::Segment))?;
            hooks.emit(AgentEvent::StepsReady {
                steps: state.step_descriptions(),
            });
            hooks.checkpoint(state);
        }

        if state.finalize.is_none() {
            let mut dispatcher =
                builtin_dispatcher(&state.project_path, filter.clone(), self.config.shell_timeout)
                    .with_cancel_token(cancel.clone());
            for tool in &self.extra_tools {
                dispatcher.register(tool.clone());
            }
            tracing::debug!(tools = ?dispatcher.tool_names(), "dispatcher ready");
            let executor = StepExecutor::new(self.policy.clone(), Arc::new(dispatcher))
                .with_max_turns_per_step(self.config.max_turns_per_step)
                .with_hooks(hooks.clone())
                .with_cancel_token(cancel.clone());
            let report = if state.step_message_indices.is_empty() {
                executor.start(state).await?
            } else {
                executor.resume(state).await?
            };
            tracing::debug!(transitions = report.trace.len(), turns = report.turns, "steps executed");

            let outcome = if self.config.finalize {
                live(Stage::Finalize)?;
                Finalizer::new(self.policy.clone(), self.publisher.clone())
                    .finalize(&state.task, &state.step_descriptions(), &state.project_path)
                    .await
            } else {
                tracing::info!("finalize disabled; leaving changes uncommitted");
                FinalizeOutcome::Skipped
            };
            state.finalize = Some(outcome.clone());
            hooks.emit(AgentEvent::Finalized { outcome });
        }

        state.completed = true;
        hooks.checkpoint(state);
        Ok(())
    }
}

fn check_project(path: PathBuf) -> Result<PathBuf> {
    if !path.is_dir() {
        return Err(Error::Input(format!(
            "project directory does not exist: {}",
            path.display()
        )));
    }
    Ok(path.canonicalize().unwrap_or(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingPublisher, ScriptedPolicy, tool_call};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn agent(policy: &ScriptedPolicy) -> Agent {
        let config = AgentConfig {
            finalize: false,
            ..Default::default()
        };
        Agent::new(config, Arc::new(policy.clone()))
    }

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {}\n").unwrap();
        dir
    }

    fn task_script() -> ScriptedPolicy {
        let policy = ScriptedPolicy::texts(&[
            "task",
            r#"{"paths": ["main.rs"]}"#,
            r#"{"additional_paths": []}"#,
            "1. add a comment to main.rs",
        ]);
        policy.push(Message::ai_text(r#"{"steps": ["add comment", "check"]}"#));
        policy.push(tool_call(
            "c1",
            "str_replace",
            json!({"old": "fn main", "new": "// entry\nfn main", "path": "main.rs"}),
        ));
        policy.push(Message::ai_text("comment added"));
        policy.push(Message::ai_text("looks good"));
        policy
    }

    #[tokio::test]
    async fn test_empty_task_is_input_error() {
        let dir = project();
        let policy = ScriptedPolicy::default();
        let err = agent(&policy)
            .run("   ", dir.path(), BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Input(_)));
        assert_eq!(policy.call_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_project_is_input_error() {
        let policy = ScriptedPolicy::default();
        let err = agent(&policy)
            .run("do it", "/no/such/project/dir", BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }

    #[tokio::test]
    async fn test_question_path() {
        let dir = project();
        let policy = ScriptedPolicy::texts(&["question", "main.rs is the entry point"]);
        let state = agent(&policy)
            .run("what is main.rs?", dir.path(), BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(state.input_type, Some(InputType::Question));
        assert_eq!(state.answer.as_deref(), Some("main.rs is the entry point"));
        assert!(state.completed);
        assert!(state.plan.is_none());
        assert!(state.finalize.is_none());
        assert_eq!(state.messages.len(), 2);
        assert_eq!(policy.call_count(), 2);
    }

    #[tokio::test]
    async fn test_task_path_end_to_end() {
        let dir = project();
        let policy = task_script();
        let agent = agent(&policy);
        let mut events = agent.subscribe();

        let state = agent
            .run("document main", dir.path(), BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(state.input_type, Some(InputType::Task));
        assert_eq!(state.resolved_paths, vec!["main.rs"]);
        assert!(state.context.contains("fn main() {}"));
        assert_eq!(state.steps.len(), 2);
        assert_eq!(state.current_step_index, 1);
        assert_eq!(state.finalize, Some(FinalizeOutcome::Skipped));
        assert!(state.completed);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("main.rs")).unwrap(),
            "// entry\nfn main() {}\n"
        );

        let mut saw_end = false;
        while let Ok(event) = events.try_recv() {
            if let AgentEvent::RunEnd { run_id } = event {
                assert_eq!(run_id, state.run_id);
                saw_end = true;
            }
        }
        assert!(saw_end);
    }

    struct CountingTool(Arc<Mutex<u32>>);

    #[async_trait::async_trait]
    impl crate::tool::Tool for CountingTool {
        fn name(&self) -> &str {
            "count"
        }
        fn description(&self) -> &str {
            "Counts calls"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({ "type": "object" })
        }
        async fn execute(
            &self,
            _tool_call_id: &str,
            _arguments: serde_json::Value,
            _cancel: CancellationToken,
        ) -> crate::tool::ToolResult {
            *self.0.lock() += 1;
            crate::tool::ToolResult::text("counted")
        }
    }

    #[tokio::test]
    async fn test_added_tool_is_offered_and_dispatched() {
        let dir = project();
        let policy = ScriptedPolicy::texts(&[
            "task",
            r#"{"paths": []}"#,
            r#"{"additional_paths": []}"#,
            "plan",
            r#"{"steps": ["count once"]}"#,
        ]);
        policy.push(tool_call("c1", "count", json!({})));
        policy.push(Message::ai_text("counted once"));
        let calls = Arc::new(Mutex::new(0));
        let mut agent = agent(&policy);
        agent.add_tool(Arc::new(CountingTool(calls.clone())));

        let state = agent.run("count", dir.path(), BTreeMap::new()).await.unwrap();
        assert!(state.completed);
        assert_eq!(*calls.lock(), 1);
        let step_request = &policy.requests()[5];
        assert!(step_request.tools.iter().any(|t| t.name == "count"));
        assert_eq!(step_request.tools.len(), 5);
    }

    #[tokio::test]
    async fn test_separate_evaluator_handles_rounds() {
        let dir = project();
        let policy = ScriptedPolicy::texts(&[
            "task",
            r#"{"paths": ["main.rs"]}"#,
            "plan",
            r#"{"steps": ["only"]}"#,
            "only done",
        ]);
        let evaluator = ScriptedPolicy::texts(&[r#"{"additional_paths": []}"#]);
        let state = agent(&policy)
            .with_evaluator(Arc::new(evaluator.clone()))
            .run("do it", dir.path(), BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(state.resolved_paths, vec!["main.rs"]);
        assert_eq!(evaluator.call_count(), 1);
        assert_eq!(policy.call_count(), 5);
    }

    #[tokio::test]
    async fn test_disabled_finalize_makes_no_policy_call() {
        let dir = project();
        let policy = ScriptedPolicy::texts(&[
            "task",
            r#"{"paths": []}"#,
            r#"{"additional_paths": []}"#,
            "plan",
            r#"{"steps": ["only"]}"#,
            "only done",
        ]);
        let publisher = Arc::new(RecordingPublisher::default());
        let state = agent(&policy)
            .with_publisher(publisher.clone())
            .run("one thing", dir.path(), BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(state.finalize, Some(FinalizeOutcome::Skipped));
        assert_eq!(policy.call_count(), 6);
        assert!(publisher.messages().is_empty());
    }

    #[tokio::test]
    async fn test_enabled_finalize_publishes_policy_message() {
        let dir = project();
        let policy = task_script();
        policy.push(Message::ai_text("Add entry comment"));
        let publisher = Arc::new(RecordingPublisher::default());
        let state = Agent::new(AgentConfig::default(), Arc::new(policy.clone()))
            .with_publisher(publisher.clone())
            .run("document main", dir.path(), BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(publisher.messages(), vec!["Add entry comment".to_string()]);
        assert_eq!(state.finalize.as_ref().and_then(|o| o.commit()), Some("abc123"));
    }

    #[tokio::test]
    async fn test_abort_stops_before_next_turn() {
        let dir = project();
        let policy = ScriptedPolicy::texts(&[
            "task",
            r#"{"paths": []}"#,
            r#"{"additional_paths": []}"#,
            "plan",
            r#"{"steps": ["one", "two"]}"#,
            "one done",
        ]);
        let mut agent = agent(&policy);
        let handle = agent.abort_handle();
        let fired = Arc::new(AtomicBool::new(false));
        let last = Arc::new(Mutex::new(None::<AgentRunState>));
        let sink = last.clone();
        agent.set_checkpoint_hook(move |s| {
            if s.current_step_index == 1 && !fired.swap(true, Ordering::SeqCst) {
                handle.abort();
            }
            *sink.lock() = Some(s.clone());
        });

        let err = agent.run("two things", dir.path(), BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err.root(), Error::Aborted));
        assert_eq!(err.stage(), Some(Stage::Execute));
        assert_eq!(err.step_index(), Some(1));
        assert_eq!(policy.call_count(), 6);

        // a later run on the same agent starts with a fresh token
        let checkpoint = last.lock().clone().unwrap();
        assert_eq!(checkpoint.current_step_index, 1);
        let state = agent.resume(checkpoint).await.unwrap();
        assert!(state.completed);
        assert_eq!(policy.call_count(), 7);
    }

    #[tokio::test]
    async fn test_checkpoint_hook_sees_progress() {
        let dir = project();
        let policy = task_script();
        let mut agent = agent(&policy);
        let snapshots = Arc::new(Mutex::new(Vec::<AgentRunState>::new()));
        let sink = snapshots.clone();
        agent.set_checkpoint_hook(move |s| sink.lock().push(s.clone()));

        agent.run("document main", dir.path(), BTreeMap::new()).await.unwrap();

        let snapshots = snapshots.lock();
        assert!(snapshots.len() >= 6);
        assert!(snapshots.first().unwrap().plan.is_none());
        assert!(snapshots.last().unwrap().completed);
        for pair in snapshots.windows(2) {
            assert!(pair[0].messages.len() <= pair[1].messages.len());
        }
    }

    #[tokio::test]
    async fn test_failure_carries_stage() {
        let dir = project();
        let policy = ScriptedPolicy::texts(&["task", "no json here"]);
        let err = agent(&policy)
            .run("do it", dir.path(), BTreeMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::ResolveContext));
        assert!(matches!(err.root(), Error::Decode(_)));
        assert!(!err.is_policy_transport());
    }

    #[tokio::test]
    async fn test_resume_from_checkpoint_mid_execution() {
        let dir = project();
        let failing = ScriptedPolicy::texts(&[
            "task",
            r#"{"paths": []}"#,
            r#"{"additional_paths": []}"#,
            "plan",
            r#"{"steps": ["one", "two"]}"#,
            "one done",
        ]);
        failing.push_error(stepwise_ai::Error::Timeout(5));

        let mut first = agent(&failing);
        let last = Arc::new(Mutex::new(None::<AgentRunState>));
        let sink = last.clone();
        first.set_checkpoint_hook(move |s| *sink.lock() = Some(s.clone()));

        let err = first.run("two things", dir.path(), BTreeMap::new()).await.unwrap_err();
        assert_eq!(err.step_index(), Some(1));

        let checkpoint = last.lock().clone().unwrap();
        assert_eq!(checkpoint.current_step_index, 1);
        assert!(!checkpoint.completed);

        let finishing = ScriptedPolicy::texts(&["two done"]);
        let state = agent(&finishing).resume(checkpoint).await.unwrap();
        assert!(state.completed);
        assert_eq!(finishing.requests()[0].messages[0].text(), "Step 2 of 2: two");
        assert_eq!(finishing.call_count(), 1);
    }

    #[tokio::test]
    async fn test_resume_completed_is_noop() {
        let dir = project();
        let mut state = AgentRunState::new("t", dir.path(), BTreeMap::new());
        state.completed = true;
        let policy = ScriptedPolicy::default();
        let back = agent(&policy).resume(state.clone()).await.unwrap();
        assert_eq!(back, state);
        assert_eq!(policy.call_count(), 0);
    }
}
