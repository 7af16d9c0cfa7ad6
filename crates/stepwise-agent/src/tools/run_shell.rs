//! Shell command tool with its own working-directory cursor

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::resolve_path;
use crate::tool::{Tool, ToolResult};

/// Maximum output size in bytes before truncation
const MAX_OUTPUT_SIZE: usize = 100_000;

/// Runs `sh -c` commands from a cursor directory.
///
/// `cd <dir>` (alone or as the head of `cd <dir> && ...`) moves the cursor
/// instead of being handed to the shell, so later calls start where the
/// policy last navigated. The cursor is private to this tool instance.
pub struct RunShellTool {
    root: PathBuf,
    cwd: Mutex<PathBuf>,
    timeout: Duration,
}

impl RunShellTool {
    pub fn new(root: impl Into<PathBuf>, timeout: Duration) -> Self {
        let root = root.into();
        Self {
            cwd: Mutex::new(root.clone()),
            root,
            timeout,
        }
    }

    /// Current cursor directory
    pub fn cwd(&self) -> PathBuf {
        self.cwd.lock().clone()
    }

    fn change_dir(&self, target: &str) -> Result<PathBuf, String> {
        let base = self.cwd();
        let next = match target {
            "" | "~" => self.root.clone(),
            t => resolve_path(&base, t),
        };
        if !next.is_dir() {
            return Err(format!("cd: no such directory: {}", target));
        }
        let next = next.canonicalize().unwrap_or(next);
        *self.cwd.lock() = next.clone();
        Ok(next)
    }
}

/// Split a leading `cd` off a command: `cd a && b` -> (`a`, Some(`b`)).
fn split_cd(command: &str) -> Option<(&str, Option<&str>)> {
    let trimmed = command.trim();
    let rest = if trimmed == "cd" {
        ""
    } else {
        trimmed.strip_prefix("cd ")?
    };
    match rest.split_once("&&") {
        Some((dir, tail)) => Some((dir.trim(), Some(tail.trim()))),
        None if rest.contains(';') || rest.contains('|') => None,
        None => Some((rest.trim(), None)),
    }
}

fn truncate(mut s: String) -> String {
    if s.len() > MAX_OUTPUT_SIZE {
        let mut cut = MAX_OUTPUT_SIZE;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str(&format!("\n\n... (output truncated at {}KB)", MAX_OUTPUT_SIZE / 1024));
    }
    s
}

async fn run(
    command: &str,
    cwd: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
) -> ToolResult {
    let child = match Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(c) => c,
        Err(e) => return ToolResult::error(format!("Failed to spawn command: {}", e)),
    };

    let output = tokio::select! {
        _ = cancel.cancelled() => return ToolResult::error("Command cancelled"),
        _ = tokio::time::sleep(timeout) => {
            return ToolResult::error(format!(
                "Command timed out after {} seconds",
                timeout.as_secs()
            ));
        }
        output = child.wait_with_output() => match output {
            Ok(o) => o,
            Err(e) => return ToolResult::error(format!("Failed to wait for command: {}", e)),
        },
    };

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&stderr);
    }
    let mut combined = truncate(combined);
    if combined.trim().is_empty() {
        combined = "(no output)".to_string();
    }

    if output.status.success() {
        ToolResult::text(combined)
    } else {
        let code = output.status.code().unwrap_or(-1);
        ToolResult::error(format!("{}\n\nCommand exited with code {}", combined, code))
    }
}

#[async_trait]
impl Tool for RunShellTool {
    fn name(&self) -> &str {
        "run_shell"
    }

    fn description(&self) -> &str {
        "Run a shell command and return its combined stdout and stderr. `cd <dir>` changes the directory for subsequent commands."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        let command = match arguments.get("command").and_then(|v| v.as_str()) {
            Some(c) => c,
            None => return ToolResult::error("Missing 'command' argument"),
        };

        let command = match split_cd(command) {
            Some((dir, tail)) => {
                let cwd = match self.change_dir(dir) {
                    Ok(cwd) => cwd,
                    Err(e) => return ToolResult::error(e),
                };
                match tail {
                    Some(rest) if !rest.is_empty() => rest,
                    _ => return ToolResult::text(format!("Working directory: {}", cwd.display())),
                }
            }
            None => command,
        };

        tracing::debug!(command, cwd = %self.cwd().display(), "run_shell");
        run(command, &self.cwd(), self.timeout, &cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(dir: &Path) -> RunShellTool {
        RunShellTool::new(dir, Duration::from_secs(10))
    }

    async fn exec(tool: &RunShellTool, command: &str) -> ToolResult {
        tool.execute("c", json!({ "command": command }), CancellationToken::new())
            .await
    }

    #[test]
    fn test_split_cd() {
        assert_eq!(split_cd("cd src"), Some(("src", None)));
        assert_eq!(split_cd("cd src && ls -la"), Some(("src", Some("ls -la"))));
        assert_eq!(split_cd("cd"), Some(("", None)));
        assert_eq!(split_cd("ls"), None);
        assert_eq!(split_cd("cdrom"), None);
        assert_eq!(split_cd("cd a; ls"), None);
    }

    #[tokio::test]
    async fn test_combined_output() {
        let dir = tempfile::tempdir().unwrap();
        let result = exec(&tool(dir.path()), "echo out; echo err 1>&2").await;
        assert!(!result.is_error);
        assert!(result.output.contains("out"));
        assert!(result.output.contains("err"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = exec(&tool(dir.path()), "exit 3").await;
        assert!(result.is_error);
        assert!(result.output.contains("exited with code 3"));
    }

    #[tokio::test]
    async fn test_cd_moves_cursor() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/marker.txt"), "").unwrap();
        let shell = tool(dir.path());

        let result = exec(&shell, "cd sub").await;
        assert!(!result.is_error, "{}", result.output);
        let listing = exec(&shell, "ls").await;
        assert!(listing.output.contains("marker.txt"));

        let chained = exec(&shell, "cd .. && ls").await;
        assert!(chained.output.contains("sub"));
    }

    #[tokio::test]
    async fn test_cd_to_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let shell = tool(dir.path());
        let result = exec(&shell, "cd nowhere").await;
        assert!(result.is_error);
        assert_eq!(shell.cwd(), dir.path());
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let shell = RunShellTool::new(dir.path(), Duration::from_millis(200));
        let result = exec(&shell, "sleep 5").await;
        assert!(result.is_error);
        assert!(result.output.contains("timed out"));
    }
}
