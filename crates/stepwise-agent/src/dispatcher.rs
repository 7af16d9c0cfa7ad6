//! Tool registry and fault-isolating invocation.
//!
//! [`ToolDispatcher::invoke`] is infallible: an unknown tool, arguments that
//! fail schema validation, a tool reporting failure, or a tool that panics
//! all come back as an [`Observation`] whose text starts with `Error:`.

use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use stepwise_ai::ToolSpec;
use tokio_util::sync::CancellationToken;

use crate::tool::{BoxedTool, to_spec};

const ERROR_PREFIX: &str = "Error:";

/// What a tool call produced, as the policy will see it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub text: String,
    pub is_error: bool,
}

impl Observation {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl AsRef<str>) -> Self {
        let message = message.as_ref();
        let text = if message.starts_with(ERROR_PREFIX) {
            message.to_string()
        } else {
            format!("{ERROR_PREFIX} {message}")
        };
        Self {
            text,
            is_error: true,
        }
    }
}

/// Maps tool names to tools and runs single calls against them
#[derive(Default)]
pub struct ToolDispatcher {
    tools: Vec<BoxedTool>,
    /// Cached compiled JSON schema validators keyed by tool name
    schema_cache: HashMap<String, Arc<jsonschema::Validator>>,
    cancel: CancellationToken,
}

impl ToolDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn register(&mut self, tool: BoxedTool) {
        self.cache_tool_schema(&tool);
        match self.tools.iter().position(|t| t.name() == tool.name()) {
            Some(idx) => self.tools[idx] = tool,
            None => self.tools.push(tool),
        }
    }

    pub fn with_tool(mut self, tool: BoxedTool) -> Self {
        self.register(tool);
        self
    }

    /// Compile and cache the JSON schema validator for a tool.
    fn cache_tool_schema(&mut self, tool: &BoxedTool) {
        let schema = tool.parameters_schema();
        match jsonschema::validator_for(&schema) {
            Ok(validator) => {
                self.schema_cache
                    .insert(tool.name().to_string(), Arc::new(validator));
            }
            Err(e) => {
                self.schema_cache.remove(tool.name());
                tracing::warn!(
                    "Invalid tool parameter schema for '{}', skipping validation: {}",
                    tool.name(),
                    e
                );
            }
        }
    }

    /// Tool names in registration order
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Specs advertised to the policy, in registration order
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| to_spec(t.as_ref())).collect()
    }

    /// Hand `token` to every tool call so cancelling it stops running tools
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run one tool call. Never fails and never unwinds.
    pub async fn invoke(&self, name: &str, call_id: &str, args: serde_json::Value) -> Observation {
        let Some(tool) = self.tools.iter().find(|t| t.name() == name) else {
            return Observation::error(format!("Tool not found: {name}"));
        };

        if let Some(err) = self
            .schema_cache
            .get(name)
            .and_then(|validator| validate_with_validator(&args, validator))
        {
            return Observation::error(err);
        }

        let call = tool.execute(call_id, args, self.cancel.clone());
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) if result.is_error => Observation::error(result.output),
            Ok(result) => Observation::ok(result.output),
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                tracing::error!(tool = name, call_id, "tool panicked: {reason}");
                Observation::error(format!("Tool '{name}' crashed: {reason}"))
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Validate tool arguments using a pre-compiled validator.
/// Returns `Some(error_message)` if validation fails, `None` if valid.
fn validate_with_validator(
    args: &serde_json::Value,
    validator: &jsonschema::Validator,
) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Tool argument validation failed:\n{}",
            errors.join("\n")
        ))
    }
}
