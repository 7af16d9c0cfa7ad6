//! Scripted policy and publisher for unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use stepwise_ai::{Content, Message, Policy, PolicyRequest};

use crate::finalizer::{FinalizeOutcome, Publisher};

/// Replies from a fixed script and records every request it was sent.
/// Once the script runs out it answers `done` with no tool calls.
#[derive(Clone, Default)]
pub(crate) struct ScriptedPolicy {
    responses: Arc<Mutex<VecDeque<stepwise_ai::Result<Message>>>>,
    requests: Arc<Mutex<Vec<PolicyRequest>>>,
}

impl ScriptedPolicy {
    pub(crate) fn new(responses: Vec<Message>) -> Self {
        let policy = Self::default();
        policy
            .responses
            .lock()
            .extend(responses.into_iter().map(Ok));
        policy
    }

    pub(crate) fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Message::ai_text(*t)).collect())
    }

    pub(crate) fn push(&self, message: Message) {
        self.responses.lock().push_back(Ok(message));
    }

    pub(crate) fn push_error(&self, error: stepwise_ai::Error) {
        self.responses.lock().push_back(Err(error));
    }

    pub(crate) fn requests(&self) -> Vec<PolicyRequest> {
        self.requests.lock().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl Policy for ScriptedPolicy {
    async fn invoke(&self, request: PolicyRequest) -> stepwise_ai::Result<Message> {
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Message::ai_text("done")))
    }
}

/// An AI message requesting one tool call
pub(crate) fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> Message {
    Message::ai(vec![Content::tool_call(id, name, arguments)])
}

/// Records commit messages and reports a push of `abc123`
#[derive(Default)]
pub(crate) struct RecordingPublisher {
    messages: Mutex<Vec<String>>,
}

impl RecordingPublisher {
    pub(crate) fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, _project: &Path, message: &str) -> FinalizeOutcome {
        self.messages.lock().push(message.to_string());
        FinalizeOutcome::Pushed {
            commit: "abc123".into(),
        }
    }
}
