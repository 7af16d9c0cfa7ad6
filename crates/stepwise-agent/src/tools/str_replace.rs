//! Exact-match replacement tool

use async_trait::async_trait;
use serde_json::json;
use similar::{ChangeTag, TextDiff};
use tokio::fs;
use tokio_util::sync::CancellationToken;

use super::ProjectScope;
use crate::tool::{Tool, ToolResult};

/// Replaces a unique occurrence of `old` with `new` in a file
pub struct StrReplaceTool {
    scope: ProjectScope,
}

impl StrReplaceTool {
    pub fn new(scope: impl Into<ProjectScope>) -> Self {
        Self {
            scope: scope.into(),
        }
    }
}

#[async_trait]
impl Tool for StrReplaceTool {
    fn name(&self) -> &str {
        "str_replace"
    }

    fn description(&self) -> &str {
        "Replace exact text in a file. `old` must occur exactly once (including whitespace); otherwise the file is left untouched."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "old": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Exact text to find"
                },
                "new": {
                    "type": "string",
                    "description": "Replacement text"
                },
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the project root"
                }
            },
            "required": ["old", "new", "path"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        let (Some(old), Some(new), Some(path_str)) = (
            arguments.get("old").and_then(|v| v.as_str()),
            arguments.get("new").and_then(|v| v.as_str()),
            arguments.get("path").and_then(|v| v.as_str()),
        ) else {
            return ToolResult::error("Missing 'old', 'new' or 'path' argument");
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

        match content.matches(old).count() {
            0 => {
                return ToolResult::error(format!(
                    "Text not found in {}. `old` must match exactly, including whitespace and newlines.",
                    path_str
                ));
            }
            1 => {}
            n => {
                return ToolResult::error(format!(
                    "Text is not unique in {} - found {} occurrences. Include more surrounding context.",
                    path_str, n
                ));
            }
        }

        let new_content = content.replacen(old, new, 1);
        let diff = generate_diff(&content, &new_content);

        if cancel.is_cancelled() {
            return ToolResult::error("Operation cancelled");
        }

        match fs::write(&path, &new_content).await {
            Ok(()) => ToolResult::text(format!("Edited {}.\n\nDiff:\n{}", path_str, diff))
                .with_details(json!({ "diff": diff })),
            Err(e) => ToolResult::error(format!("Failed to write {}: {}", path_str, e)),
        }
    }
}

/// Generate a line diff string
fn generate_diff(old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut output = Vec::new();

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => continue,
        };
        output.push(format!("{}{}", sign, change));
    }

    if output.len() > 50 {
        output.truncate(50);
        output.push("... (diff truncated)\n".to_string());
    }

    output.join("")
}
