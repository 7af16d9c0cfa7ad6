//! Direct answers for the question path

use stepwise_ai::{Message, PolicyRequest, SharedPolicy};

use crate::error::Result;
use crate::prompts;

pub struct Answerer {
    policy: SharedPolicy,
}

impl Answerer {
    pub fn new(policy: SharedPolicy) -> Self {
        Self { policy }
    }

    /// Ask for an answer; the returned message is what gets logged.
    pub async fn answer(&self, task: &str, project_tree: &str) -> Result<Message> {
        let request = PolicyRequest::prompt(
            prompts::ANSWER_SYSTEM,
            prompts::answer_user(task, project_tree),
        );
        Ok(self.policy.invoke(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedPolicy;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_answer_sees_tree() {
        let policy = ScriptedPolicy::texts(&["It parses args."]);
        let answer = Answerer::new(Arc::new(policy.clone()))
            .answer("what does main.rs do?", "proj/\n  main.rs")
            .await
            .unwrap();
        assert_eq!(answer.text(), "It parses args.");
        assert!(policy.requests()[0].messages[0].text().contains("  main.rs"));
    }
}
