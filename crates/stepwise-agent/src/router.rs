//! Question/task classification

use stepwise_ai::{PolicyRequest, SharedPolicy};

use crate::error::Result;
use crate::prompts;
use crate::state::InputType;

pub struct Router {
    policy: SharedPolicy,
}

impl Router {
    pub fn new(policy: SharedPolicy) -> Self {
        Self { policy }
    }

    /// `Question` iff the policy's reply mentions "question"; anything else,
    /// including an empty reply, is a `Task`.
    pub async fn classify(&self, task: &str) -> Result<InputType> {
        let request = PolicyRequest::prompt(prompts::ROUTER_SYSTEM, prompts::router_user(task));
        let response = self.policy.invoke(request).await?;
        let label = classify_text(&response.text());
        tracing::info!(?label, "task routed");
        Ok(label)
    }
}

fn classify_text(text: &str) -> InputType {
    if text.to_lowercase().contains("question") {
        InputType::Question
    } else {
        InputType::Task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::test_support::ScriptedPolicy;
    use std::sync::Arc;

    #[test]
    fn test_classify_text() {
        assert_eq!(classify_text("question"), InputType::Question);
        assert_eq!(classify_text("This is a QUESTION."), InputType::Question);
        assert_eq!(classify_text("task"), InputType::Task);
        assert_eq!(classify_text("not sure"), InputType::Task);
        assert_eq!(classify_text(""), InputType::Task);
    }

    #[tokio::test]
    async fn test_classify_via_policy() {
        let router = Router::new(Arc::new(ScriptedPolicy::texts(&["Question"])));
        assert_eq!(router.classify("what does main do?").await.unwrap(), InputType::Question);

        let router = Router::new(Arc::new(ScriptedPolicy::texts(&["¯\\_(ツ)_/¯"])));
        assert_eq!(router.classify("hmm").await.unwrap(), InputType::Task);
    }

    #[tokio::test]
    async fn test_policy_error_propagates() {
        let policy = ScriptedPolicy::default();
        policy.push_error(stepwise_ai::Error::InvalidApiKey);
        let err = Router::new(Arc::new(policy)).classify("x").await.unwrap_err();
        assert!(matches!(err, Error::Ai(_)));
    }
}
