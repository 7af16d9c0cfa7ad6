//! Free-text planning

use std::collections::BTreeMap;
use stepwise_ai::{PolicyRequest, SharedPolicy};

use crate::decode::DecodeError;
use crate::error::Result;
use crate::prompts;

/// Turns a task and its gathered context into an implementation plan
pub struct Planner {
    policy: SharedPolicy,
}

impl Planner {
    pub fn new(policy: SharedPolicy) -> Self {
        Self { policy }
    }

    pub async fn plan(
        &self,
        task: &str,
        context: &str,
        operator_metadata: &BTreeMap<String, String>,
    ) -> Result<String> {
        let request = PolicyRequest::prompt(
            prompts::PLANNER_SYSTEM,
            prompts::planner_user(task, context, operator_metadata),
        );
        let response = self.policy.invoke(request).await?;
        let plan = response.text().trim().to_string();
        if plan.is_empty() {
            return Err(DecodeError::Empty.into());
        }
        tracing::debug!(chars = plan.len(), "plan drafted");
        Ok(plan)
    }
}
