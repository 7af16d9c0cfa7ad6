//! Tool trait and results

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use stepwise_ai::ToolSpec;
use tokio_util::sync::CancellationToken;

/// Result of a tool execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Observation text handed back to the policy
    pub output: String,
    /// Whether the execution resulted in an error
    pub is_error: bool,
    /// Optional structured details (for event consumers)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ToolResult {
    /// Create a successful text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            output: text.into(),
            is_error: false,
            details: None,
        }
    }

    /// Create an error result
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            output: message.into(),
            is_error: true,
            details: None,
        }
    }

    /// Add details to the result
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Trait for executable tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used in API calls)
    fn name(&self) -> &str;

    /// Tool description for the LLM
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments
    async fn execute(
        &self,
        tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult;
}

/// Type alias for a boxed tool
pub type BoxedTool = Arc<dyn Tool>;

/// Describe a tool for a policy request
pub fn to_spec(tool: &dyn Tool) -> ToolSpec {
    ToolSpec::new(tool.name(), tool.description(), tool.parameters_schema())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                }
            })
        }
        async fn execute(
            &self,
            _tool_call_id: &str,
            arguments: serde_json::Value,
            _cancel: CancellationToken,
        ) -> ToolResult {
            let text = arguments
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or("(empty)");
            ToolResult::text(text)
        }
    }

    #[tokio::test]
    async fn test_execute_echo() {
        let result = EchoTool
            .execute(
                "call_1",
                serde_json::json!({"text": "hello"}),
                CancellationToken::new(),
            )
            .await;
        assert!(!result.is_error);
        assert_eq!(result.output, "hello");
    }

    #[test]
    fn test_tool_result_error() {
        let r = ToolResult::error("bad");
        assert!(r.is_error);
        assert_eq!(r.output, "bad");
    }

    #[test]
    fn test_to_spec() {
        let spec = to_spec(&EchoTool);
        assert_eq!(spec.name, "echo");
        assert_eq!(spec.description, "Echoes input");
        assert_eq!(spec.parameters["type"], "object");
    }
}
