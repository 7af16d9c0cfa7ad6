//! File viewing tool

use async_trait::async_trait;
use serde_json::json;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use super::ProjectScope;
use crate::tool::{Tool, ToolResult};

/// Maximum number of lines to read by default
const MAX_LINES: usize = 2000;
/// Maximum characters per line before truncation
const MAX_LINE_LENGTH: usize = 2000;

/// Tool for reading file contents
pub struct ViewFileTool {
    scope: ProjectScope,
}

impl ViewFileTool {
    pub fn new(scope: impl Into<ProjectScope>) -> Self {
        Self {
            scope: scope.into(),
        }
    }
}

#[async_trait]
impl Tool for ViewFileTool {
    fn name(&self) -> &str {
        "view_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file in the project. Lines are numbered from 1. Use offset and limit for large files."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the project root"
                },
                "offset": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Line number to start reading from (1-indexed)"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum number of lines to read"
                }
            },
            "required": ["path"]
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
        let path = match self.scope.resolve(path_str) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        if cancel.is_cancelled() {
            return ToolResult::error("Operation cancelled");
        }

        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("Failed to read {}: {}", path_str, e)),
        };

        let lines: Vec<&str> = content.lines().collect();
        let total_lines = lines.len();
        if total_lines == 0 {
            return ToolResult::text(format!("({} is empty)", path_str));
        }

        let offset = arguments
            .get("offset")
            .and_then(|v| v.as_u64())
            .map(|o| (o as usize).saturating_sub(1))
            .unwrap_or(0);
        let limit = arguments
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|l| l as usize)
            .unwrap_or(MAX_LINES);

        if offset >= total_lines {
            return ToolResult::error(format!(
                "Offset {} is beyond end of file ({} lines total)",
                offset + 1,
                total_lines
            ));
        }

        let end = (offset + limit).min(total_lines);
        let mut output = lines[offset..end]
            .iter()
            .enumerate()
            .map(|(i, line)| {
                let shown: String = line.chars().take(MAX_LINE_LENGTH).collect();
                format!("{:>6}\t{}", offset + i + 1, shown)
            })
            .collect::<Vec<_>>()
            .join("\n");

        if end < total_lines {
            output.push_str(&format!(
                "\n\n... ({} more lines not shown. Use offset={} to continue reading)",
                total_lines - end,
                end + 1
            ));
        }

        ToolResult::text(output)
    }
}
