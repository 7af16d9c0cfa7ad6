//! Run checkpoints: one JSON file per run id

use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use stepwise_agent::{AgentRunState, InputType};

/// Summary line for `--runs`
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub task: String,
    pub project: PathBuf,
    pub updated_at: DateTime<Utc>,
    pub status: String,
}

impl RunSummary {
    fn from_state(state: &AgentRunState) -> Self {
        let status = if state.completed {
            "done".to_string()
        } else if state.input_type == Some(InputType::Question) {
            "answering".to_string()
        } else if state.steps.is_empty() {
            "planning".to_string()
        } else {
            format!("step {}/{}", state.current_step_index + 1, state.steps.len())
        };
        Self {
            run_id: state.run_id.clone(),
            task: state.task.clone(),
            project: state.project_path.clone(),
            updated_at: state.updated_at,
            status,
        }
    }
}

/// Stores checkpoints as `<dir>/<run_id>.json`
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Default checkpoint directory
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stepwise")
            .join("runs")
    }

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }

    /// Write the checkpoint, replacing any previous one for the run
    pub fn save(&self, state: &AgentRunState) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&state.run_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(state)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)
    }

    /// Load a run by id. A unique id prefix is accepted too.
    pub fn load(&self, run_id: &str) -> io::Result<AgentRunState> {
        let path = self.resolve(run_id)?;
        let content = fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(io::Error::other)
    }

    fn resolve(&self, run_id: &str) -> io::Result<PathBuf> {
        let exact = self.path_for(run_id);
        if exact.exists() {
            return Ok(exact);
        }
        let matches: Vec<PathBuf> = self
            .json_files()?
            .into_iter()
            .filter(|p| {
                p.file_stem()
                    .and_then(|s| s.to_str())
                    .is_some_and(|s| s.starts_with(run_id))
            })
            .collect();
        match matches.as_slice() {
            [one] => Ok(one.clone()),
            [] => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Run not found: {run_id}"),
            )),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Run id prefix is ambiguous: {run_id}"),
            )),
        }
    }

    fn json_files(&self) -> io::Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// All readable checkpoints, most recently updated first
    pub fn list(&self) -> io::Result<Vec<RunSummary>> {
        let mut runs: Vec<RunSummary> = self
            .json_files()?
            .iter()
            .filter_map(|path| read_state(path))
            .map(|state| RunSummary::from_state(&state))
            .collect();
        runs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(runs)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn read_state(path: &Path) -> Option<AgentRunState> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(state) => Some(state),
        Err(e) => {
            tracing::warn!(path = %path.display(), "skipping unreadable checkpoint: {e}");
            None
        }
    }
}
