//! Step-scoped ReAct loop.
//!
//! Each step sees only its own window of the conversation: the messages from
//! the step's recorded offset onward. A step ends on the first policy
//! response without tool calls; tool calls are dispatched in the order issued
//! and their observations appended before the next turn.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use stepwise_ai::{Message, PolicyRequest, Role, SharedPolicy};
use tokio_util::sync::CancellationToken;

use crate::dispatcher::ToolDispatcher;
use crate::error::{Error, Result, Stage};
use crate::events::AgentEvent;
use crate::hooks::RunHooks;
use crate::prompts;
use crate::state::AgentRunState;

pub const DEFAULT_MAX_TURNS_PER_STEP: u32 = 40;

/// Executor state. Every state entered is recorded in the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExecutorState {
    Running(usize),
    Advancing { next: usize },
    Terminal,
}

/// What an execution pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub trace: Vec<ExecutorState>,
    /// Policy turns taken across all steps
    pub turns: u32,
}

pub struct StepExecutor {
    policy: SharedPolicy,
    dispatcher: Arc<ToolDispatcher>,
    max_turns_per_step: u32,
    hooks: RunHooks,
    cancel: CancellationToken,
}

impl StepExecutor {
    pub fn new(policy: SharedPolicy, dispatcher: Arc<ToolDispatcher>) -> Self {
        Self {
            policy,
            dispatcher,
            max_turns_per_step: DEFAULT_MAX_TURNS_PER_STEP,
            hooks: RunHooks::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_max_turns_per_step(mut self, max: u32) -> Self {
        self.max_turns_per_step = max;
        self
    }

    pub fn with_hooks(mut self, hooks: RunHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Stop before the next policy turn once `token` is cancelled. A policy
    /// call in flight is dropped.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Open step 0 and run every step to completion.
    pub async fn start(&self, state: &mut AgentRunState) -> Result<ExecutionReport> {
        if state.steps.is_empty() {
            return Err(Error::State("no steps to execute".to_string()).in_run(
                &state.run_id,
                Stage::Execute,
                None,
            ));
        }
        self.open(state, 0)?;
        self.drive(state, ExecutorState::Running(0)).await
    }

    /// Continue a checkpointed run at its current step without reopening it.
    /// A step whose window already ends in a tool-free answer is treated as
    /// finished.
    pub async fn resume(&self, state: &mut AgentRunState) -> Result<ExecutionReport> {
        state
            .validate()
            .map_err(|e| e.in_run(&state.run_id, Stage::Execute, Some(state.current_step_index)))?;

        let i = state.current_step_index;
        let finished = state
            .step_window(i)
            .last()
            .is_some_and(|m| m.role == Role::Ai && !m.has_tool_calls());
        let from = if finished {
            self.after(state, i)
        } else {
            ExecutorState::Running(i)
        };
        tracing::info!(run_id = %state.run_id, step = i, ?from, "resuming execution");
        self.drive(state, from).await
    }

    fn after(&self, state: &AgentRunState, i: usize) -> ExecutorState {
        if i + 1 < state.steps.len() {
            ExecutorState::Advancing { next: i + 1 }
        } else {
            ExecutorState::Terminal
        }
    }

    fn open(&self, state: &mut AgentRunState, index: usize) -> Result<()> {
        state
            .open_step(index)
            .map_err(|e| e.in_run(&state.run_id, Stage::Execute, Some(index)))?;
        let description = state.steps[index].description.clone();
        tracing::info!(step = index, total = state.steps.len(), "step started: {description}");
        self.hooks.emit(AgentEvent::StepStart {
            index,
            total: state.steps.len(),
            description,
        });
        self.hooks.checkpoint(state);
        Ok(())
    }

    async fn drive(&self, state: &mut AgentRunState, from: ExecutorState) -> Result<ExecutionReport> {
        let mut trace = Vec::new();
        let mut current = from;
        let mut step_turns = 0u32;
        let mut total_turns = 0u32;

        loop {
            trace.push(current);
            match current {
                ExecutorState::Running(i) => {
                    if self.cancel.is_cancelled() {
                        tracing::warn!(step = i, "aborted");
                        return Err(Error::Aborted.in_run(&state.run_id, Stage::Execute, Some(i)));
                    }
                    if step_turns >= self.max_turns_per_step {
                        return Err(Error::StepBudgetExhausted {
                            step_index: i,
                            limit: self.max_turns_per_step,
                        }
                        .in_run(&state.run_id, Stage::Execute, Some(i)));
                    }
                    step_turns += 1;
                    total_turns += 1;

                    let response = self
                        .turn(state, i)
                        .await
                        .map_err(|e| e.in_run(&state.run_id, Stage::Execute, Some(i)))?;
                    let calls = response.tool_calls();
                    self.hooks.emit(AgentEvent::PolicyTurn {
                        step_index: i,
                        turn: step_turns,
                        text: response.text(),
                        tool_calls: calls.len(),
                    });
                    state.messages.push(response);

                    if calls.is_empty() {
                        tracing::info!(step = i, turns = step_turns, "step complete");
                        self.hooks.emit(AgentEvent::StepComplete {
                            index: i,
                            turns: step_turns,
                        });
                        step_turns = 0;
                        current = self.after(state, i);
                        continue;
                    }

                    for call in calls {
                        self.hooks.emit(AgentEvent::ToolExecutionStart {
                            tool_call_id: call.id.clone(),
                            tool_name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        });
                        let observation = self
                            .dispatcher
                            .invoke(&call.name, &call.id, call.arguments)
                            .await;
                        tracing::debug!(
                            step = i,
                            tool = %call.name,
                            is_error = observation.is_error,
                            "tool call finished"
                        );
                        self.hooks.emit(AgentEvent::ToolExecutionEnd {
                            tool_call_id: call.id.clone(),
                            tool_name: call.name.clone(),
                            result: observation.text.clone(),
                            is_error: observation.is_error,
                        });
                        state.messages.push(
                            Message::tool(call.id, call.name, observation.text, observation.is_error)
                                .with_metadata("step_index", serde_json::json!(i)),
                        );
                    }
                    self.hooks.checkpoint(state);
                }
                ExecutorState::Advancing { next } => {
                    self.open(state, next)?;
                    current = ExecutorState::Running(next);
                }
                ExecutorState::Terminal => break,
            }
        }

        Ok(ExecutionReport {
            trace,
            turns: total_turns,
        })
    }

    async fn turn(&self, state: &AgentRunState, i: usize) -> Result<Message> {
        let step = &state.steps[i];
        let system = prompts::executor_system(
            &step.description,
            &state.prior_steps(),
            state.plan.as_deref().unwrap_or_default(),
            &state.project_tree,
        );
        let request = PolicyRequest {
            system_prompt: Some(system),
            messages: state.step_window(i).to_vec(),
            tools: self.dispatcher.specs(),
            ..Default::default()
        };
        tracing::debug!(step = i, window = request.messages.len(), "policy turn");
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Aborted),
            response = self.policy.invoke(request) => Ok(response?),
        }
    }
}
