//! File creation tool

use async_trait::async_trait;
use serde_json::json;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use super::ProjectScope;
use crate::tool::{Tool, ToolResult};

/// Tool for creating or overwriting files
pub struct CreateFileTool {
    scope: ProjectScope,
}

impl CreateFileTool {
    pub fn new(scope: impl Into<ProjectScope>) -> Self {
        Self {
            scope: scope.into(),
        }
    }
}

#[async_trait]
impl Tool for CreateFileTool {
    fn name(&self) -> &str {
        "create_file"
    }

    fn description(&self) -> &str {
        "Create a file with the given content, overwriting it if it exists. Parent directories are created as needed."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the project root"
                },
                "content": {
                    "type": "string",
                    "description": "Full content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        let path_str = match arguments.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolResult::error("Missing 'path' argument"),
        };
        let content = match arguments.get("content").and_then(|v| v.as_str()) {
            Some(c) => c,
            None => return ToolResult::error("Missing 'content' argument"),
        };
        let path = match self.scope.resolve(path_str) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        if cancel.is_cancelled() {
            return ToolResult::error("Operation cancelled");
        }

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                if let Err(e) = fs::create_dir_all(parent).await {
                    return ToolResult::error(format!("Failed to create directory: {}", e));
                }
            }
        }

        let existed = path.exists();
        match fs::write(&path, content).await {
            Ok(()) => ToolResult::text(format!(
                "{} {} ({} bytes)",
                if existed { "Overwrote" } else { "Created" },
                path_str,
                content.len()
            )),
            Err(e) => ToolResult::error(format!("Failed to write {}: {}", path_str, e)),
        }
    }
}
