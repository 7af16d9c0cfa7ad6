//! Run state. This is also the checkpoint format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use stepwise_ai::Message;

use crate::conversation::ConversationLog;
use crate::error::{Error, Result};
use crate::finalizer::FinalizeOutcome;
use crate::prompts;

/// How the router classified the task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    Question,
    Task,
}

/// One atomic unit of the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub description: String,
}

impl Step {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }
}

/// Everything a run knows, serializable so it can be checkpointed and
/// resumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRunState {
    pub run_id: String,
    pub messages: ConversationLog,
    pub task: String,
    pub project_path: PathBuf,
    #[serde(default)]
    pub operator_metadata: BTreeMap<String, String>,
    /// Ordered and duplicate-free
    #[serde(default)]
    pub resolved_paths: Vec<String>,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub project_tree: String,
    pub plan: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub current_step_index: usize,
    /// Step index -> offset into `messages` where that step's window starts
    #[serde(default)]
    pub step_message_indices: BTreeMap<usize, usize>,
    pub input_type: Option<InputType>,
    pub answer: Option<String>,
    pub finalize: Option<FinalizeOutcome>,
    #[serde(default)]
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentRunState {
    pub fn new(
        task: impl Into<String>,
        project_path: impl Into<PathBuf>,
        operator_metadata: BTreeMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            messages: ConversationLog::new(),
            task: task.into(),
            project_path: project_path.into(),
            operator_metadata,
            resolved_paths: Vec::new(),
            context: String::new(),
            project_tree: String::new(),
            plan: None,
            steps: Vec::new(),
            current_step_index: 0,
            step_message_indices: BTreeMap::new(),
            input_type: None,
            answer: None,
            finalize: None,
            completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Open the window for step `index`: record where it starts and append the
    /// kickoff message inside it.
    pub fn open_step(&mut self, index: usize) -> Result<()> {
        let step = self.steps.get(index).ok_or_else(|| {
            Error::State(format!(
                "cannot open step {index}: plan has {} steps",
                self.steps.len()
            ))
        })?;
        let kickoff = Message::human(prompts::step_kickoff(index, self.steps.len(), &step.description))
            .with_metadata("step_index", serde_json::json!(index));

        self.step_message_indices.insert(index, self.messages.len());
        self.messages.push(kickoff);
        self.current_step_index = index;
        Ok(())
    }

    /// Messages belonging to step `index` onward. Empty if the step was never
    /// opened.
    pub fn step_window(&self, index: usize) -> &[Message] {
        match self.step_message_indices.get(&index) {
            Some(&offset) => self.messages.slice(offset),
            None => &[],
        }
    }

    /// Delete messages by id, keeping every recorded step offset pointed at
    /// the same message it pointed at before. Returns how many were removed.
    pub fn delete_messages(&mut self, ids: &[&str]) -> usize {
        let removed = self.messages.delete(ids);
        if removed.is_empty() {
            return 0;
        }
        for offset in self.step_message_indices.values_mut() {
            let before = removed.iter().take_while(|&&pos| pos < *offset).count();
            *offset -= before;
        }
        removed.len()
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.steps.get(self.current_step_index)
    }

    /// Descriptions of the steps before the current one, one per line
    pub fn prior_steps(&self) -> String {
        self.steps[..self.current_step_index.min(self.steps.len())]
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {}", i + 1, s.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn step_descriptions(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.description.clone()).collect()
    }

    /// Check the step bookkeeping invariants. Used before resuming.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::State("no steps to execute".to_string()));
        }
        if self.current_step_index >= self.steps.len() {
            return Err(Error::State(format!(
                "current step {} is out of range for {} steps",
                self.current_step_index,
                self.steps.len()
            )));
        }
        let mut previous = 0;
        for (&step, &offset) in &self.step_message_indices {
            if step >= self.steps.len() {
                return Err(Error::State(format!("window recorded for unknown step {step}")));
            }
            if offset < previous || offset > self.messages.len() {
                return Err(Error::State(format!(
                    "step {step} window offset {offset} is out of order or past the log"
                )));
            }
            previous = offset;
        }
        if !self.step_message_indices.contains_key(&self.current_step_index) {
            return Err(Error::State(format!(
                "current step {} was never opened",
                self.current_step_index
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_steps(n: usize) -> AgentRunState {
        let mut state = AgentRunState::new("task", "/tmp/project", BTreeMap::new());
        state.steps = (0..n).map(|i| Step::new(format!("step {i}"))).collect();
        state
    }

    #[test]
    fn test_open_step_records_offset_and_kickoff() {
        let mut state = state_with_steps(2);
        state.messages.push(Message::human("earlier"));

        state.open_step(0).unwrap();
        assert_eq!(state.step_message_indices[&0], 1);
        assert_eq!(state.step_window(0).len(), 1);
        assert_eq!(state.step_window(0)[0].text(), "Step 1 of 2: step 0");

        state.messages.push(Message::ai_text("done"));
        state.open_step(1).unwrap();
        assert_eq!(state.step_message_indices[&1], 3);
        assert_eq!(state.current_step_index, 1);
        assert_eq!(state.prior_steps(), "1. step 0");
    }

    #[test]
    fn test_open_step_out_of_range() {
        let mut state = state_with_steps(1);
        assert!(matches!(state.open_step(1), Err(Error::State(_))));
    }

    #[test]
    fn test_unopened_window_is_empty() {
        let state = state_with_steps(1);
        assert!(state.step_window(0).is_empty());
    }

    #[test]
    fn test_validate() {
        let mut state = state_with_steps(2);
        assert!(state.validate().is_err());
        state.open_step(0).unwrap();
        state.validate().unwrap();

        state.step_message_indices.insert(1, 99);
        assert!(state.validate().is_err());
    }

    #[test]
    fn test_delete_before_window_keeps_kickoff() {
        let mut state = state_with_steps(1);
        let task = Message::human("task");
        let task_id = task.id.clone();
        state.messages.push(task);
        state.messages.push(Message::human("note"));
        state.open_step(0).unwrap();
        state.messages.push(Message::ai_text("step work"));

        assert_eq!(state.delete_messages(&[task_id.as_str()]), 1);
        assert_eq!(state.step_message_indices[&0], 1);
        let window: Vec<String> = state.step_window(0).iter().map(|m| m.text()).collect();
        assert_eq!(window, vec!["Step 1 of 1: step 0", "step work"]);
        state.validate().unwrap();
    }

    #[test]
    fn test_delete_inside_window_leaves_offsets() {
        let mut state = state_with_steps(2);
        state.messages.push(Message::human("task"));
        state.open_step(0).unwrap();
        let work = Message::ai_text("scratch");
        let work_id = work.id.clone();
        state.messages.push(work);
        state.open_step(1).unwrap();

        assert_eq!(state.step_message_indices[&1], 3);
        assert_eq!(state.delete_messages(&[work_id.as_str(), "missing"]), 1);
        assert_eq!(state.step_message_indices[&0], 1);
        assert_eq!(state.step_message_indices[&1], 2);
        assert_eq!(state.step_window(1)[0].text(), "Step 2 of 2: step 1");
        assert_eq!(state.delete_messages(&["missing"]), 0);
    }

    #[test]
    fn test_checkpoint_roundtrip_preserves_windows() {
        let mut state = state_with_steps(2);
        state.open_step(0).unwrap();
        let json = serde_json::to_string(&state).unwrap();
        let back: AgentRunState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
