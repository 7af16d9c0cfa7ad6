//! Plain-text rendering of agent events

use stepwise_agent::{AgentEvent, Convergence};

/// Truncate a string to `max` characters, appending "..." if truncated.
/// Operates on Unicode char boundaries, not bytes.
pub fn truncate_chars(s: &str, max: usize) -> String {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

/// One display line per event, or `None` for events that stay quiet.
pub fn format_event(event: &AgentEvent, verbose: bool) -> Option<String> {
    match event {
        AgentEvent::RunStart { run_id, resumed } => Some(if *resumed {
            format!("[Resuming run {run_id}]")
        } else {
            format!("[Run {run_id}]")
        }),
        AgentEvent::Routed { input_type } => Some(format!("[Routed as {input_type:?}]")),
        AgentEvent::ContextResolved { paths, outcome } => {
            let how = match outcome {
                Convergence::Converged { rounds } => format!("converged after {rounds} round(s)"),
                Convergence::Exhausted { rounds } => format!("stopped after {rounds} round(s)"),
            };
            Some(format!("[Context: {} file(s), {how}]", paths.len()))
        }
        AgentEvent::PlanReady { plan } => {
            if verbose {
                Some(format!("[Plan]\n{plan}"))
            } else {
                Some("[Plan ready]".to_string())
            }
        }
        AgentEvent::StepsReady { steps } => {
            let mut out = format!("[{} step(s)]", steps.len());
            for (i, step) in steps.iter().enumerate() {
                out.push_str(&format!("\n  {}. {}", i + 1, truncate_chars(step, 100)));
            }
            Some(out)
        }
        AgentEvent::StepStart {
            index,
            total,
            description,
        } => Some(format!("\n== Step {}/{}: {} ==", index + 1, total, description)),
        AgentEvent::PolicyTurn { text, .. } => {
            let text = text.trim();
            if text.is_empty() {
                None
            } else {
                Some(text.to_string())
            }
        }
        AgentEvent::ToolExecutionStart { tool_name, .. } => {
            Some(format!("[Running {}...]", tool_name))
        }
        AgentEvent::ToolExecutionEnd {
            tool_name,
            result,
            is_error,
            ..
        } => {
            if *is_error {
                Some(format!("[{} failed: {}]", tool_name, truncate_chars(result, 200)))
            } else if verbose {
                Some(format!("[{}: {}]", tool_name, truncate_chars(result, 200)))
            } else {
                None
            }
        }
        AgentEvent::StepComplete { index, turns } => {
            Some(format!("[Step {} done in {} turn(s)]", index + 1, turns))
        }
        AgentEvent::Answered { .. } => None,
        AgentEvent::Finalized { outcome } => Some(format!("[Finalize: {outcome}]")),
        AgentEvent::RunEnd { .. } => None,
        AgentEvent::Error { message } => Some(format!("Error: {}", message)),
    }
}
