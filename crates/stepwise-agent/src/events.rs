//! Agent event types

use serde::{Deserialize, Serialize};

use crate::finalizer::FinalizeOutcome;
use crate::resolver::Convergence;
use crate::state::InputType;

/// Events emitted during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Run started (or resumed)
    RunStart { run_id: String, resumed: bool },

    /// The router classified the task
    Routed { input_type: InputType },

    /// File context converged (or gave up)
    ContextResolved {
        paths: Vec<String>,
        outcome: Convergence,
    },

    /// The plan is written
    PlanReady { plan: String },

    /// The plan was split into steps
    StepsReady { steps: Vec<String> },

    /// A step window was opened
    StepStart {
        index: usize,
        total: usize,
        description: String,
    },

    /// The policy answered within a step
    PolicyTurn {
        step_index: usize,
        turn: u32,
        text: String,
        tool_calls: usize,
    },

    /// Tool execution started
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// Tool execution completed
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        result: String,
        is_error: bool,
    },

    /// A step finished with a tool-free response
    StepComplete { index: usize, turns: u32 },

    /// Question path finished
    Answered { answer: String },

    /// Commit and push attempted
    Finalized { outcome: FinalizeOutcome },

    /// Run reached its terminal node
    RunEnd { run_id: String },

    /// The run aborted
    Error { message: String },
}

impl AgentEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::RunEnd { .. } | AgentEvent::Error { .. })
    }
}
