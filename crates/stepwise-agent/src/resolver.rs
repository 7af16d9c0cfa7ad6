//! Bounded, iterative selection of the files a task needs.
//!
//! One planner call proposes an initial set, then up to `max_rounds`
//! evaluator calls may add or drop paths. The loop stops early as soon as an
//! evaluation proposes nothing new.

use serde::{Deserialize, Serialize};
use std::path::Path;
use stepwise_ai::{PolicyRequest, SharedPolicy};

use crate::decode::decode;
use crate::error::Result;
use crate::project::{PathFilter, assemble_context, normalize_path};
use crate::prompts;

pub const DEFAULT_MAX_ROUNDS: u32 = 3;

/// How the evaluation loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Convergence {
    /// The evaluator proposed no new paths in round `rounds`
    Converged { rounds: u32 },
    /// Every round proposed something new
    Exhausted { rounds: u32 },
}

impl Convergence {
    pub fn rounds(&self) -> u32 {
        match self {
            Convergence::Converged { rounds } | Convergence::Exhausted { rounds } => *rounds,
        }
    }
}

/// Result of context resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ContextResolution {
    pub context: String,
    pub resolved_paths: Vec<String>,
    pub outcome: Convergence,
}

#[derive(Debug, Deserialize)]
struct InitialPaths {
    #[serde(default)]
    paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Evaluation {
    #[serde(default)]
    additional_paths: Vec<String>,
    #[serde(default)]
    remove_paths: Vec<String>,
}

pub struct FileContextResolver {
    planner: SharedPolicy,
    evaluator: SharedPolicy,
    filter: PathFilter,
    max_rounds: u32,
}

impl FileContextResolver {
    pub fn new(planner: SharedPolicy, evaluator: SharedPolicy) -> Self {
        Self {
            planner,
            evaluator,
            filter: PathFilter::default(),
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    pub fn with_filter(mut self, filter: PathFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Normalize, drop disallowed paths and duplicates
    fn admissible(&self, root: &Path, paths: Vec<String>) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for raw in paths {
            let path = normalize_path(root, &raw);
            if path.is_empty() || out.contains(&path) {
                continue;
            }
            if self.filter.is_disallowed(&path) {
                tracing::debug!(path = %path, "dropping disallowed path");
                continue;
            }
            out.push(path);
        }
        out
    }

    pub async fn resolve(&self, task: &str, root: &Path, project_tree: &str) -> Result<ContextResolution> {
        let request = PolicyRequest::prompt(
            prompts::INITIAL_PATHS_SYSTEM,
            prompts::initial_paths_user(task, project_tree),
        )
        .with_schema(prompts::paths_schema());
        let response = self.planner.invoke(request).await?;
        let initial: InitialPaths = decode(&response)?;

        let mut resolved = self.admissible(root, initial.paths);
        let mut context = assemble_context(root, project_tree, &mut resolved).await;
        tracing::info!(paths = resolved.len(), "initial context selected");

        let mut outcome = Convergence::Exhausted {
            rounds: self.max_rounds,
        };
        for round in 1..=self.max_rounds {
            let request = PolicyRequest::prompt(
                prompts::EVALUATE_SYSTEM,
                prompts::evaluate_user(task, &context, &resolved),
            )
            .with_schema(prompts::evaluation_schema());
            let response = self.evaluator.invoke(request).await?;
            let evaluation: Evaluation = decode(&response)?;

            let removals = self.admissible(root, evaluation.remove_paths);
            let before = resolved.len();
            resolved.retain(|p| !removals.contains(p));
            let removed = before - resolved.len();

            let new: Vec<String> = self
                .admissible(root, evaluation.additional_paths)
                .into_iter()
                .filter(|p| !resolved.contains(p))
                .collect();

            tracing::debug!(round, added = new.len(), removed, "context evaluation");

            if new.is_empty() {
                if removed > 0 {
                    context = assemble_context(root, project_tree, &mut resolved).await;
                }
                outcome = Convergence::Converged { rounds: round };
                break;
            }

            resolved.extend(new);
            context = assemble_context(root, project_tree, &mut resolved).await;
        }

        match outcome {
            Convergence::Converged { rounds } => {
                tracing::info!(rounds, paths = resolved.len(), "context converged")
            }
            Convergence::Exhausted { rounds } => tracing::warn!(
                rounds,
                paths = resolved.len(),
                "context did not converge; continuing with what was gathered"
            ),
        }

        Ok(ContextResolution {
            context,
            resolved_paths: resolved,
            outcome,
        })
    }
}
