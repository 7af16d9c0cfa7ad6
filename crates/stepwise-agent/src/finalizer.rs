//! Commit-and-push once every step has run.
//!
//! Finalization never fails the run: whatever git says is reported as a
//! [`FinalizeOutcome`], and work already written to disk stays there.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Output;
use std::sync::Arc;
use stepwise_ai::{PolicyRequest, SharedPolicy};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::prompts;

const SUMMARY_MAX_CHARS: usize = 72;

/// What the publish side effect achieved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FinalizeOutcome {
    Pushed { commit: String },
    NothingToCommit,
    NotARepository,
    /// Committed locally; the branch has no upstream to push to
    NoUpstream { commit: String },
    PushFailed { commit: String, detail: String },
    CommitFailed { detail: String },
    /// Publishing was switched off for this run
    Skipped,
}

impl FinalizeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            FinalizeOutcome::Pushed { .. } | FinalizeOutcome::NothingToCommit | FinalizeOutcome::Skipped
        )
    }

    pub fn commit(&self) -> Option<&str> {
        match self {
            FinalizeOutcome::Pushed { commit }
            | FinalizeOutcome::NoUpstream { commit }
            | FinalizeOutcome::PushFailed { commit, .. } => Some(commit),
            _ => None,
        }
    }
}

impl std::fmt::Display for FinalizeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinalizeOutcome::Pushed { commit } => write!(f, "pushed {commit}"),
            FinalizeOutcome::NothingToCommit => write!(f, "nothing to commit"),
            FinalizeOutcome::NotARepository => write!(f, "not a git repository"),
            FinalizeOutcome::NoUpstream { commit } => {
                write!(f, "committed {commit}; no upstream to push to")
            }
            FinalizeOutcome::PushFailed { commit, detail } => {
                write!(f, "committed {commit}; push failed: {detail}")
            }
            FinalizeOutcome::CommitFailed { detail } => write!(f, "commit failed: {detail}"),
            FinalizeOutcome::Skipped => write!(f, "skipped"),
        }
    }
}

/// The external side effect run at the end of a task
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, project: &Path, message: &str) -> FinalizeOutcome;
}

/// Commits everything in the project directory and pushes to the upstream.
#[derive(Debug, Clone, Default)]
pub struct GitPublisher;

async fn git(project: &Path, args: &[&str]) -> Result<Output, String> {
    debug!(?args, "git");
    Command::new("git")
        .args(args)
        .current_dir(project)
        .output()
        .await
        .map_err(|e| format!("failed to run git: {e}"))
}

fn stderr_of(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        stderr
    }
}

#[async_trait]
impl Publisher for GitPublisher {
    async fn publish(&self, project: &Path, message: &str) -> FinalizeOutcome {
        if !project.is_dir() {
            return FinalizeOutcome::NotARepository;
        }
        match git(project, &["rev-parse", "--is-inside-work-tree"]).await {
            Ok(out) if out.status.success() => {}
            Ok(_) => return FinalizeOutcome::NotARepository,
            Err(detail) => return FinalizeOutcome::CommitFailed { detail },
        }

        match git(project, &["add", "-A"]).await {
            Ok(out) if out.status.success() => {}
            Ok(out) => return FinalizeOutcome::CommitFailed { detail: stderr_of(&out) },
            Err(detail) => return FinalizeOutcome::CommitFailed { detail },
        }

        match git(project, &["diff", "--cached", "--quiet"]).await {
            Ok(out) if out.status.success() => return FinalizeOutcome::NothingToCommit,
            Ok(out) if out.status.code() == Some(1) => {}
            Ok(out) => return FinalizeOutcome::CommitFailed { detail: stderr_of(&out) },
            Err(detail) => return FinalizeOutcome::CommitFailed { detail },
        }

        match git(project, &["commit", "-m", message]).await {
            Ok(out) if out.status.success() => {}
            Ok(out) => return FinalizeOutcome::CommitFailed { detail: stderr_of(&out) },
            Err(detail) => return FinalizeOutcome::CommitFailed { detail },
        }

        let commit = match git(project, &["rev-parse", "--short", "HEAD"]).await {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).trim().to_string(),
            _ => "HEAD".to_string(),
        };

        let upstream = git(
            project,
            &["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"],
        )
        .await;
        if !matches!(&upstream, Ok(out) if out.status.success()) {
            warn!(%commit, "no upstream configured; leaving commit local");
            return FinalizeOutcome::NoUpstream { commit };
        }

        match git(project, &["push"]).await {
            Ok(out) if out.status.success() => FinalizeOutcome::Pushed { commit },
            Ok(out) => FinalizeOutcome::PushFailed {
                commit,
                detail: stderr_of(&out),
            },
            Err(detail) => FinalizeOutcome::PushFailed { commit, detail },
        }
    }
}

/// Deterministic message used when the policy cannot write one
pub fn fallback_message(task: &str) -> String {
    let first = task.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("update");
    let mut summary = format!("stepwise: {first}");
    if summary.chars().count() > SUMMARY_MAX_CHARS {
        summary = summary.chars().take(SUMMARY_MAX_CHARS - 3).collect();
        summary.push_str("...");
    }
    summary
}

pub struct Finalizer {
    policy: SharedPolicy,
    publisher: Arc<dyn Publisher>,
}

impl Finalizer {
    pub fn new(policy: SharedPolicy, publisher: Arc<dyn Publisher>) -> Self {
        Self { policy, publisher }
    }

    /// Ask the policy for a commit message, falling back on failure.
    pub async fn compose_message(&self, task: &str, steps: &[String]) -> String {
        let request = PolicyRequest::prompt(prompts::COMMIT_SYSTEM, prompts::commit_user(task, steps));
        match self.policy.invoke(request).await {
            Ok(response) => {
                let text = response.text().trim().to_string();
                if text.is_empty() {
                    warn!("empty commit message from policy; using fallback");
                    fallback_message(task)
                } else {
                    text
                }
            }
            Err(e) => {
                warn!("commit message generation failed, using fallback: {e}");
                fallback_message(task)
            }
        }
    }

    pub async fn finalize(&self, task: &str, steps: &[String], project: &Path) -> FinalizeOutcome {
        let message = self.compose_message(task, steps).await;
        let outcome = self.publisher.publish(project, &message).await;
        if outcome.is_success() {
            tracing::info!(%outcome, "finalized");
        } else {
            warn!(%outcome, "finalize did not publish");
        }
        outcome
    }
}
