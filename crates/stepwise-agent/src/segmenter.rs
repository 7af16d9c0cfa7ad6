//! Plan to ordered steps

use serde::Deserialize;
use std::collections::BTreeMap;
use stepwise_ai::{PolicyRequest, SharedPolicy};

use crate::decode::{DecodeError, decode};
use crate::error::Result;
use crate::prompts;
use crate::state::Step;

#[derive(Debug, Deserialize)]
struct Steps {
    steps: Vec<String>,
}

/// Splits a plan into atomic steps, kept verbatim in the order given
pub struct StepSegmenter {
    policy: SharedPolicy,
}

impl StepSegmenter {
    pub fn new(policy: SharedPolicy) -> Self {
        Self { policy }
    }

    pub async fn segment(&self, plan: &str, operator_metadata: &BTreeMap<String, String>) -> Result<Vec<Step>> {
        let request = PolicyRequest::prompt(
            prompts::SEGMENTER_SYSTEM,
            prompts::segmenter_user(plan, operator_metadata),
        )
        .with_schema(prompts::steps_schema());
        let response = self.policy.invoke(request).await?;
        let parsed: Steps = decode(&response)?;

        let steps: Vec<Step> = parsed
            .steps
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .map(Step::new)
            .collect();
        if steps.is_empty() {
            return Err(DecodeError::Rejected("plan produced no steps".to_string()).into());
        }
        tracing::debug!(count = steps.len(), "plan segmented");
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::test_support::ScriptedPolicy;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_steps_kept_in_policy_order() {
        let policy = ScriptedPolicy::texts(&[
            "```json\n{\"steps\": [\"write test\", \"implement\", \"run test\"]}\n```",
        ]);
        let steps = StepSegmenter::new(Arc::new(policy))
            .segment("plan", &BTreeMap::new())
            .await
            .unwrap();
        let descriptions: Vec<_> = steps.iter().map(|s| s.description.as_str()).collect();
        assert_eq!(descriptions, vec!["write test", "implement", "run test"]);
    }

    #[tokio::test]
    async fn test_empty_steps_is_decode_error() {
        let policy = ScriptedPolicy::texts(&[r#"{"steps": []}"#]);
        let err = StepSegmenter::new(Arc::new(policy))
            .segment("plan", &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decode(DecodeError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_schema_requested() {
        let policy = ScriptedPolicy::texts(&[r#"{"steps": ["one"]}"#]);
        StepSegmenter::new(Arc::new(policy.clone()))
            .segment("plan", &BTreeMap::new())
            .await
            .unwrap();
        assert!(policy.requests()[0].response_schema.is_some());
    }
}
