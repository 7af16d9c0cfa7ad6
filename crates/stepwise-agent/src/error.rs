//! Error types for stepwise-agent

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decode::DecodeError;

/// Result type alias using stepwise-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// The node of the run graph an error surfaced from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Route,
    Answer,
    ResolveContext,
    Plan,
    Segment,
    Execute,
    Finalize,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Route => "route",
            Stage::Answer => "answer",
            Stage::ResolveContext => "resolve_context",
            Stage::Plan => "plan",
            Stage::Segment => "segment",
            Stage::Execute => "execute",
            Stage::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during agent operations
#[derive(Error, Debug)]
pub enum Error {
    /// The policy call itself failed (transport, quota, timeout)
    #[error(transparent)]
    Ai(#[from] stepwise_ai::Error),

    /// The policy answered, but not in the expected shape
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Missing task or unusable project directory; the run never starts
    #[error("invalid input: {0}")]
    Input(String),

    /// A step kept requesting tools past its turn budget
    #[error("step {step_index} did not finish within {limit} policy turns")]
    StepBudgetExhausted { step_index: usize, limit: u32 },

    /// The caller aborted the run
    #[error("run aborted")]
    Aborted,

    /// A resumed or hand-built state violates an invariant
    #[error("invalid run state: {0}")]
    State(String),

    /// A fatal error annotated with where in which run it happened
    #[error(
        "run {run_id} failed during {stage}{}: {source}",
        .step_index.map(|i| format!(" at step {i}")).unwrap_or_default()
    )]
    Run {
        run_id: String,
        stage: Stage,
        step_index: Option<usize>,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Attach run context; an error that already carries it is left alone.
    pub fn in_run(self, run_id: &str, stage: Stage, step_index: Option<usize>) -> Self {
        match self {
            Error::Run { .. } => self,
            other => Error::Run {
                run_id: run_id.to_string(),
                stage,
                step_index,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, without run context
    pub fn root(&self) -> &Error {
        match self {
            Error::Run { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the language-model call failed (as opposed to its output)
    pub fn is_policy_transport(&self) -> bool {
        matches!(self.root(), Error::Ai(_))
    }

    /// Step index recorded with the error, if it happened while executing
    pub fn step_index(&self) -> Option<usize> {
        match self {
            Error::Run { step_index, .. } => *step_index,
            Error::StepBudgetExhausted { step_index, .. } => Some(*step_index),
            _ => None,
        }
    }

    pub fn run_id(&self) -> Option<&str> {
        match self {
            Error::Run { run_id, .. } => Some(run_id),
            _ => None,
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Run { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
