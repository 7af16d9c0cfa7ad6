//! The run's conversation log and its merge rule.
//!
//! A log only grows, except through an explicit [`LogUpdate::ReplaceAll`],
//! which swaps the whole history at once. Deleting messages is expressed as a
//! replace with the survivors.

use serde::{Deserialize, Serialize};
use stepwise_ai::Message;

/// An update to a conversation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "messages", rename_all = "snake_case")]
pub enum LogUpdate {
    /// Add to the tail
    Append(Vec<Message>),
    /// Discard the history and install these messages verbatim
    ReplaceAll(Vec<Message>),
}

/// Merge an update into a message sequence.
pub fn merge(mut current: Vec<Message>, update: LogUpdate) -> Vec<Message> {
    match update {
        LogUpdate::Append(messages) => {
            current.extend(messages);
            current
        }
        LogUpdate::ReplaceAll(messages) => messages,
    }
}

/// Ordered, append-only message history for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationLog {
    messages: Vec<Message>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Apply an update using the merge rule
    pub fn merge(&mut self, update: LogUpdate) {
        let current = std::mem::take(&mut self.messages);
        self.messages = merge(current, update);
    }

    pub fn append(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn replace(&mut self, messages: Vec<Message>) {
        self.merge(LogUpdate::ReplaceAll(messages));
    }

    /// All entries from `from_index` to the end. Offsets past the end yield
    /// an empty slice.
    pub fn slice(&self, from_index: usize) -> &[Message] {
        let start = from_index.min(self.messages.len());
        &self.messages[start..]
    }

    /// Remove the messages with the given ids and return the positions they
    /// held. Run logs go through `AgentRunState::delete_messages`, which also
    /// shifts the step offsets.
    pub(crate) fn delete(&mut self, ids: &[&str]) -> Vec<usize> {
        let mut removed = Vec::new();
        let mut survivors = Vec::with_capacity(self.messages.len());
        for (pos, message) in self.messages.iter().enumerate() {
            if ids.contains(&message.id.as_str()) {
                removed.push(pos);
            } else {
                survivors.push(message.clone());
            }
        }
        if !removed.is_empty() {
            self.replace(survivors);
        }
        removed
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(log: &ConversationLog) -> Vec<String> {
        log.messages().iter().map(|m| m.text()).collect()
    }

    #[test]
    fn test_append_adds_to_tail() {
        let mut log = ConversationLog::new();
        log.append(vec![Message::human("a")]);
        log.merge(LogUpdate::Append(vec![Message::ai_text("b")]));
        assert_eq!(texts(&log), vec!["a", "b"]);
    }

    #[test]
    fn test_append_is_associative() {
        let a = vec![Message::human("a1"), Message::ai_text("a2")];
        let b = vec![Message::human("b1")];

        let mut split = ConversationLog::new();
        split.merge(LogUpdate::Append(a.clone()));
        split.merge(LogUpdate::Append(b.clone()));

        let mut joined = ConversationLog::new();
        joined.merge(LogUpdate::Append(a.into_iter().chain(b).collect()));

        assert_eq!(split, joined);
    }

    #[test]
    fn test_replace_is_idempotent() {
        let mut log = ConversationLog::from_messages(vec![
            Message::human("old 1"),
            Message::ai_text("old 2"),
        ]);
        let replacement = vec![Message::human("new")];

        log.merge(LogUpdate::ReplaceAll(replacement.clone()));
        let once = log.clone();
        log.merge(LogUpdate::ReplaceAll(replacement.clone()));

        assert_eq!(log, once);
        assert_eq!(log.messages(), replacement.as_slice());
    }

    #[test]
    fn test_slice_is_non_destructive() {
        let log = ConversationLog::from_messages(vec![
            Message::human("0"),
            Message::human("1"),
            Message::human("2"),
        ]);
        assert_eq!(log.slice(1).len(), 2);
        assert_eq!(log.slice(1)[0].text(), "1");
        assert_eq!(log.len(), 3);
        assert!(log.slice(3).is_empty());
        assert!(log.slice(10).is_empty());
    }

    #[test]
    fn test_delete_by_id() {
        let keep = Message::human("keep");
        let drop = Message::ai_text("drop");
        let drop_id = drop.id.clone();
        let mut log = ConversationLog::from_messages(vec![keep.clone(), drop]);

        assert_eq!(log.delete(&[drop_id.as_str()]), vec![1]);
        assert_eq!(log.messages(), &[keep]);
        assert!(log.delete(&["missing"]).is_empty());
    }

    #[test]
    fn test_log_update_serde_shape() {
        let update = LogUpdate::ReplaceAll(vec![]);
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["kind"], "replace_all");
    }
}
