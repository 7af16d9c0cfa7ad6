//! Built-in tools: file viewing, creation, exact replacement and shell.

mod create_file;
mod run_shell;
mod str_replace;
mod view_file;

pub use create_file::CreateFileTool;
pub use run_shell::RunShellTool;
pub use str_replace::StrReplaceTool;
pub use view_file::ViewFileTool;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::dispatcher::ToolDispatcher;
use crate::project::{PathFilter, normalize_path};

/// Join a relative path onto `base`; absolute paths are kept as given.
pub(crate) fn resolve_path(root: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    }
}

/// Where the file tools may read and write: inside `root`, and nowhere the
/// filter disallows.
#[derive(Debug, Clone)]
pub struct ProjectScope {
    root: PathBuf,
    filter: PathFilter,
}

impl ProjectScope {
    pub fn new(root: impl Into<PathBuf>, filter: PathFilter) -> Self {
        Self {
            root: root.into(),
            filter,
        }
    }

    /// Resolve a tool path argument to a file under the root, or explain why
    /// it is refused.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        let relative = normalize_path(&self.root, path);
        if relative.is_empty() {
            return Err("Path is empty".to_string());
        }
        if self.filter.is_disallowed(&relative) {
            return Err(format!(
                "Access denied: {} is outside the project or matches a disallowed pattern",
                path.trim()
            ));
        }
        Ok(self.root.join(relative))
    }
}

impl From<PathBuf> for ProjectScope {
    fn from(root: PathBuf) -> Self {
        Self::new(root, PathFilter::default())
    }
}

impl From<&Path> for ProjectScope {
    fn from(root: &Path) -> Self {
        Self::new(root, PathFilter::default())
    }
}

/// A dispatcher with the four built-in tools, all rooted at `project_root`.
/// The file tools refuse paths `filter` disallows; `run_shell` is not
/// confined.
pub fn builtin_dispatcher(
    project_root: impl Into<PathBuf>,
    filter: PathFilter,
    shell_timeout: Duration,
) -> ToolDispatcher {
    let root = project_root.into();
    let scope = ProjectScope::new(root.clone(), filter);
    ToolDispatcher::new()
        .with_tool(Arc::new(ViewFileTool::new(scope.clone())))
        .with_tool(Arc::new(CreateFileTool::new(scope.clone())))
        .with_tool(Arc::new(StrReplaceTool::new(scope)))
        .with_tool(Arc::new(RunShellTool::new(root, shell_timeout)))
}
