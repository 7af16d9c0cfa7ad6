//! stepwise-agent: plan-and-execute orchestration
//!
//! A run routes the task, then either answers it directly or resolves file
//! context, drafts a plan, splits it into steps and drives each step through
//! a tool-using policy loop before committing the result.

pub mod answer;
pub mod conversation;
pub mod decode;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod finalizer;
pub mod hooks;
pub mod planner;
pub mod project;
pub mod prompts;
pub mod resolver;
pub mod router;
pub mod segmenter;
pub mod state;
pub mod tool;
pub mod tools;

#[cfg(test)]
mod test_support;

pub use conversation::{ConversationLog, LogUpdate};
pub use decode::{DecodeError, decode};
pub use dispatcher::{Observation, ToolDispatcher};
pub use engine::{AbortHandle, Agent, AgentConfig};
pub use error::{Error, Result, Stage};
pub use events::AgentEvent;
pub use executor::{ExecutionReport, ExecutorState, StepExecutor};
pub use finalizer::{FinalizeOutcome, Finalizer, GitPublisher, Publisher};
pub use hooks::{CheckpointHook, RunHooks};
pub use project::PathFilter;
pub use resolver::{ContextResolution, Convergence, FileContextResolver};
pub use state::{AgentRunState, InputType, Step};
pub use tool::{BoxedTool, Tool, ToolResult};
pub use tools::{ProjectScope, builtin_dispatcher};
