//! Core types for policy interactions

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Wire protocol spoken by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Api {
    AnthropicMessages,
    OpenAIChat,
}

/// Known LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    OpenAI,
    Groq,
    OpenRouter,
    Ollama,
    Custom,
}

impl Provider {
    /// Parse a provider name as written in config files and CLI flags
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "anthropic" => Provider::Anthropic,
            "openai" => Provider::OpenAI,
            "groq" => Provider::Groq,
            "openrouter" => Provider::OpenRouter,
            "ollama" => Provider::Ollama,
            _ => Provider::Custom,
        }
    }

    /// Get a human-readable name for this provider
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Anthropic => "Anthropic",
            Provider::OpenAI => "OpenAI",
            Provider::Groq => "Groq",
            Provider::OpenRouter => "OpenRouter",
            Provider::Ollama => "Ollama",
            Provider::Custom => "Custom",
        }
    }

    /// Get the environment variable name for this provider's API key
    pub fn api_key_env_var(&self) -> Option<&'static str> {
        match self {
            Provider::Anthropic => Some("ANTHROPIC_API_KEY"),
            Provider::OpenAI => Some("OPENAI_API_KEY"),
            Provider::Groq => Some("GROQ_API_KEY"),
            Provider::OpenRouter => Some("OPENROUTER_API_KEY"),
            Provider::Ollama => None,
            Provider::Custom => None,
        }
    }

    /// The protocol this provider speaks
    pub fn api(&self) -> Api {
        match self {
            Provider::Anthropic => Api::AnthropicMessages,
            _ => Api::OpenAIChat,
        }
    }

    /// Default endpoint for this provider
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Anthropic => "https://api.anthropic.com",
            Provider::OpenAI => "https://api.openai.com/v1",
            Provider::Groq => "https://api.groq.com/openai/v1",
            Provider::OpenRouter => "https://openrouter.ai/api/v1",
            Provider::Ollama => "http://localhost:11434/v1",
            Provider::Custom => "",
        }
    }
}

/// Seconds a single policy HTTP call may take, connect to last body byte
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// Model definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    /// Model identifier (e.g., "claude-sonnet-4-5-20250929")
    pub id: String,
    /// Provider
    pub provider: Provider,
    /// Base URL for API calls
    pub base_url: String,
    /// Maximum output tokens
    pub max_tokens: u32,
    /// Additional headers for API calls
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Per-request timeout for API calls
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Model {
    /// Build a model with the provider's default endpoint
    pub fn new(provider: Provider, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider,
            base_url: provider.default_base_url().to_string(),
            max_tokens: 8192,
            headers: HashMap::new(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Content blocks in messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    /// Text content
    Text { text: String },
    /// Thinking/reasoning content
    Thinking { thinking: String },
    /// Tool call request
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
}

impl Content {
    /// Create text content
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a tool call
    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Get text if this is text content
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Check if this is a tool call
    pub fn is_tool_call(&self) -> bool {
        matches!(self, Self::ToolCall { .. })
    }
}

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Human,
    Ai,
    Tool,
}

/// A tool invocation requested by the policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A single conversation entry.
///
/// Messages are immutable once appended to a log; the `id` is what deletion
/// and correlation refer to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: Vec<Content>,
    /// For tool messages: the id of the call this observation answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For tool messages: whether the observation reports a failure
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    /// Free-form side metadata (tool name, step index, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub timestamp: i64,
}

impl Message {
    fn new(role: Role, content: Vec<Content>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            tool_call_id: None,
            is_error: false,
            metadata: BTreeMap::new(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Create a human message with text content
    pub fn human(text: impl Into<String>) -> Self {
        Self::new(Role::Human, vec![Content::text(text)])
    }

    /// Create an AI message from content blocks
    pub fn ai(content: Vec<Content>) -> Self {
        Self::new(Role::Ai, content)
    }

    /// Create an AI message with only text
    pub fn ai_text(text: impl Into<String>) -> Self {
        Self::ai(vec![Content::text(text)])
    }

    /// Create a tool observation message
    pub fn tool(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        observation: impl Into<String>,
        is_error: bool,
    ) -> Self {
        let mut msg = Self::new(Role::Tool, vec![Content::text(observation)]);
        msg.tool_call_id = Some(tool_call_id.into());
        msg.is_error = is_error;
        msg.metadata
            .insert("tool_name".to_string(), serde_json::Value::String(tool_name.into()));
        msg
    }

    /// Attach a side-metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Extract all tool calls, in the order they were issued
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        if self.role != Role::Ai {
            return vec![];
        }
        self.content
            .iter()
            .filter_map(|c| match c {
                Content::ToolCall {
                    id,
                    name,
                    arguments,
                } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Whether this message requests at least one tool call
    pub fn has_tool_calls(&self) -> bool {
        self.role == Role::Ai && self.content.iter().any(Content::is_tool_call)
    }

    /// Get combined text content
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Tool definition advertised to the policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name (used in API calls)
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema for parameters
    pub parameters: serde_json::Value,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Everything a single policy invocation sees
#[derive(Debug, Clone, Default)]
pub struct PolicyRequest {
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    /// JSON Schema the response text is expected to satisfy
    pub response_schema: Option<serde_json::Value>,
    pub max_tokens: Option<u32>,
}

impl PolicyRequest {
    /// A one-shot prompt: system instructions plus a single human message
    pub fn prompt(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(system.into()),
            messages: vec![Message::human(user)],
            ..Default::default()
        }
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    /// The system prompt with the schema instruction appended, if any
    pub fn effective_system_prompt(&self) -> Option<String> {
        match (&self.system_prompt, &self.response_schema) {
            (None, None) => None,
            (Some(s), None) => Some(s.clone()),
            (system, Some(schema)) => {
                let mut out = system.clone().unwrap_or_default();
                if !out.is_empty() {
                    out.push_str("\n\n");
                }
                out.push_str(
                    "Respond with a single JSON value matching this schema and nothing else:\n",
                );
                out.push_str(&schema.to_string());
                Some(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_calls_in_issue_order() {
        let msg = Message::ai(vec![
            Content::text("let me look"),
            Content::tool_call("c1", "view_file", serde_json::json!({"path": "a"})),
            Content::tool_call("c2", "view_file", serde_json::json!({"path": "b"})),
        ]);
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[1].id, "c2");
        assert!(msg.has_tool_calls());
        assert_eq!(msg.text(), "let me look");
    }

    #[test]
    fn test_human_message_never_has_tool_calls() {
        let mut msg = Message::human("hi");
        msg.content
            .push(Content::tool_call("c1", "x", serde_json::Value::Null));
        assert!(msg.tool_calls().is_empty());
        assert!(!msg.has_tool_calls());
    }

    #[test]
    fn test_tool_message_records_correlation() {
        let msg = Message::tool("call_9", "run_shell", "ok", false);
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_9"));
        assert_eq!(msg.metadata["tool_name"], "run_shell");
        assert_eq!(msg.text(), "ok");
    }

    #[test]
    fn test_message_ids_are_unique() {
        assert_ne!(Message::human("a").id, Message::human("a").id);
    }

    #[test]
    fn test_effective_system_prompt_appends_schema() {
        let req = PolicyRequest::prompt("Pick files.", "task")
            .with_schema(serde_json::json!({"type": "object"}));
        let system = req.effective_system_prompt().unwrap();
        assert!(system.starts_with("Pick files."));
        assert!(system.contains("{\"type\":\"object\"}"));
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!(Provider::parse("Anthropic"), Provider::Anthropic);
        assert_eq!(Provider::parse("ollama"), Provider::Ollama);
        assert_eq!(Provider::parse("whatever"), Provider::Custom);
        assert_eq!(Provider::Ollama.api(), Api::OpenAIChat);
    }

    #[test]
    fn test_message_serde_skips_empty_fields() {
        let msg = Message::human("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("tool_call_id").is_none());
        assert!(json.get("is_error").is_none());
        assert!(json.get("metadata").is_none());
        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }
}
