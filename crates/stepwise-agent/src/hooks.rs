//! Event and checkpoint callbacks shared by the engine and the executor

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::events::AgentEvent;
use crate::state::AgentRunState;

/// Called with the full state after every transition
pub type CheckpointHook = Arc<dyn Fn(&AgentRunState) + Send + Sync>;

#[derive(Clone, Default)]
pub struct RunHooks {
    events: Option<broadcast::Sender<AgentEvent>>,
    checkpoint: Option<CheckpointHook>,
}

impl RunHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(mut self, tx: broadcast::Sender<AgentEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_checkpoint(mut self, hook: CheckpointHook) -> Self {
        self.checkpoint = Some(hook);
        self
    }

    pub fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    pub fn checkpoint(&self, state: &mut AgentRunState) {
        state.touch();
        if let Some(hook) = &self.checkpoint {
            hook(state);
        }
    }
}
