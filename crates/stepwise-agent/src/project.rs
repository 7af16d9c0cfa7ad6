//! Read-only views of the project directory: the disallowed-path filter, the
//! rendered tree, and file context assembly.

use glob::{MatchOptions, Pattern};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Directories never descended into when rendering the tree
const SKIP_DIRS: &[&str] = &["node_modules", "target", "__pycache__"];
/// Tree rendering stops after this many entries
const MAX_TREE_ENTRIES: usize = 1000;

/// Patterns excluded by default. Each is matched against the whole relative
/// path, each of its ancestor prefixes, and each component name.
pub const DEFAULT_DISALLOWED: &[&str] = &[
    ".env",
    ".env.*",
    "*.pem",
    "*.key",
    "id_rsa*",
    "secrets",
    ".git",
    ".stepwise",
];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Glob-based filter for paths the agent must never read. Context assembly
/// and the file tools both consult it.
#[derive(Debug, Clone)]
pub struct PathFilter {
    patterns: Vec<Pattern>,
}

impl Default for PathFilter {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_DISALLOWED
                .iter()
                .filter_map(|p| Pattern::new(p).ok())
                .collect(),
        }
    }
}

impl PathFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, glob::PatternError> {
        let patterns = patterns
            .iter()
            .map(|p| Pattern::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Default patterns plus `extra`
    pub fn with_defaults<S: AsRef<str>>(extra: &[S]) -> Result<Self, glob::PatternError> {
        let mut filter = Self::default();
        for p in extra {
            filter.patterns.push(Pattern::new(p.as_ref())?);
        }
        Ok(filter)
    }

    /// Whether `path` (relative to the project root) must be skipped. Paths
    /// that are absolute or climb out with `..` are always disallowed.
    pub fn is_disallowed(&self, path: &str) -> bool {
        let path = Path::new(path);
        let mut prefix = PathBuf::new();
        for component in path.components() {
            let name = match component {
                Component::Normal(name) => name,
                Component::CurDir => continue,
                _ => return true,
            };
            prefix.push(name);
            let name = name.to_string_lossy();
            let prefix_str = prefix.to_string_lossy();
            if self.patterns.iter().any(|p| {
                p.matches_with(&name, MATCH_OPTIONS) || p.matches_with(&prefix_str, MATCH_OPTIONS)
            }) {
                return true;
            }
        }
        false
    }
}

/// Normalize a policy-supplied path: trim, drop a leading `./`, make paths
/// under `root` relative.
pub fn normalize_path(root: &Path, path: &str) -> String {
    let trimmed = path.trim().trim_start_matches("./");
    let candidate = Path::new(trimmed);
    if candidate.is_absolute() {
        if let Ok(rel) = candidate.strip_prefix(root) {
            return rel.to_string_lossy().into_owned();
        }
    }
    trimmed.to_string()
}

/// Render the project structure as an indented listing. Disallowed entries
/// are left out.
pub fn project_tree(root: &Path, filter: &PathFilter) -> String {
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string());
    let mut lines = vec![format!("{name}/")];
    collect_tree(root, root, filter, 1, &mut lines);
    if lines.len() > MAX_TREE_ENTRIES {
        lines.truncate(MAX_TREE_ENTRIES);
        lines.push(format!("... (showing first {MAX_TREE_ENTRIES} entries)"));
    }
    lines.join("\n")
}

fn collect_tree(base: &Path, dir: &Path, filter: &PathFilter, depth: usize, lines: &mut Vec<String>) {
    if lines.len() > MAX_TREE_ENTRIES {
        return;
    }
    let read_dir = match fs::read_dir(dir) {
        Ok(d) => d,
        Err(_) => return,
    };

    let mut items: Vec<_> = read_dir.flatten().collect();
    items.sort_by_key(|e| e.path());

    for entry in items {
        let full_path = entry.path();
        let relative = full_path.strip_prefix(base).unwrap_or(&full_path);
        let relative_str = relative.to_string_lossy();
        if filter.is_disallowed(&relative_str) {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        let indent = "  ".repeat(depth);
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            lines.push(format!("{indent}{name}/"));
            if !SKIP_DIRS.contains(&name.as_str()) {
                collect_tree(base, &full_path, filter, depth + 1, lines);
            }
        } else {
            lines.push(format!("{indent}{name}"));
        }
    }
}

/// Concatenate the tree and one fenced block per readable file.
///
/// Paths that cannot be read are removed from `paths`.
pub async fn assemble_context(root: &Path, project_tree: &str, paths: &mut Vec<String>) -> String {
    let mut context = format!("Project structure:\n{project_tree}\n");
    let mut readable = Vec::with_capacity(paths.len());
    for path in paths.drain(..) {
        match tokio::fs::read_to_string(root.join(&path)).await {
            Ok(contents) => {
                context.push_str(&format!("\n--- {path} ---\n```\n{contents}"));
                if !contents.ends_with('\n') {
                    context.push('\n');
                }
                context.push_str("```\n");
                readable.push(path);
            }
            Err(e) => tracing::warn!(path = %path, "skipping unreadable file: {e}"),
        }
    }
    *paths = readable;
    context
}
