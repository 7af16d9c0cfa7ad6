//! Prompt text and response schemas for each policy call.

use serde_json::{Value, json};
use std::collections::BTreeMap;

pub const ROUTER_SYSTEM: &str = "\
You classify requests sent to a coding agent. Reply with exactly one word: \
`question` if the user only wants information or an explanation, or `task` \
if they want files in the project changed.";

pub const ANSWER_SYSTEM: &str = "\
You are a senior engineer answering a question about a software project. \
Answer directly and concisely, referring to files by their path.";

pub const INITIAL_PATHS_SYSTEM: &str = "\
You select the files a coding agent needs to read before working on a task. \
Pick paths from the project tree only. Prefer a small, focused set.";

pub const EVALUATE_SYSTEM: &str = "\
You review the files gathered for a coding task. Given the task and the \
contents collected so far, list any further paths from the project tree that \
are needed (`additional_paths`) and any gathered paths that are irrelevant \
(`remove_paths`). Return empty lists when the context is sufficient.";

pub const PLANNER_SYSTEM: &str = "\
You are a senior engineer writing an implementation plan for a coding task. \
Describe the changes file by file. Be concrete; do not write the code itself.";

pub const SEGMENTER_SYSTEM: &str = "\
You split an implementation plan into an ordered list of small, atomic steps. \
Each step must be independently actionable by an agent that can read files, \
write files, replace text and run shell commands.";

pub const COMMIT_SYSTEM: &str = "\
You write git commit messages. Reply with the message only: a summary line of \
at most 72 characters, optionally followed by a blank line and a short body.";

pub fn paths_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "paths": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["paths"]
    })
}

pub fn evaluation_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "additional_paths": { "type": "array", "items": { "type": "string" } },
            "remove_paths": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["additional_paths"]
    })
}

pub fn steps_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "steps": { "type": "array", "items": { "type": "string" }, "minItems": 1 }
        },
        "required": ["steps"]
    })
}

/// Render operator metadata as `key: value` lines
pub fn format_metadata(metadata: &BTreeMap<String, String>) -> String {
    if metadata.is_empty() {
        return "(none)".to_string();
    }
    metadata
        .iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn router_user(task: &str) -> String {
    format!("Request:\n{task}")
}

pub fn answer_user(task: &str, project_tree: &str) -> String {
    format!("Project structure:\n{project_tree}\n\nQuestion:\n{task}")
}

pub fn initial_paths_user(task: &str, project_tree: &str) -> String {
    format!("Project structure:\n{project_tree}\n\nTask:\n{task}")
}

pub fn evaluate_user(task: &str, context: &str, resolved: &[String]) -> String {
    format!(
        "Task:\n{task}\n\nPaths gathered so far:\n{}\n\nGathered context:\n{context}",
        resolved.join("\n")
    )
}

pub fn planner_user(task: &str, context: &str, metadata: &BTreeMap<String, String>) -> String {
    format!(
        "Task:\n{task}\n\nOperator notes:\n{}\n\nProject context:\n{context}",
        format_metadata(metadata)
    )
}

pub fn segmenter_user(plan: &str, metadata: &BTreeMap<String, String>) -> String {
    format!(
        "Plan:\n{plan}\n\nOperator notes:\n{}",
        format_metadata(metadata)
    )
}

/// System prompt for one step of execution
pub fn executor_system(current_step: &str, prior_steps: &str, plan: &str, project_tree: &str) -> String {
    format!(
        "You are a coding agent working through a plan one step at a time. \
Use the tools to carry out the current step only. When the step is done, \
reply with a short summary and no tool calls.\n\n\
Current step:\n{current_step}\n\n\
Completed steps:\n{prior}\n\n\
Full plan:\n{plan}\n\n\
Project structure:\n{project_tree}",
        prior = if prior_steps.is_empty() { "(none)" } else { prior_steps },
    )
}

/// Opening message of a step's window
pub fn step_kickoff(index: usize, total: usize, description: &str) -> String {
    format!("Step {} of {}: {}", index + 1, total, description)
}

pub fn commit_user(task: &str, steps: &[String]) -> String {
    let mut out = format!("Task:\n{task}");
    if !steps.is_empty() {
        out.push_str("\n\nSteps carried out:\n");
        for step in steps {
            out.push_str("- ");
            out.push_str(step);
            out.push('\n');
        }
    }
    out
}
