//! OpenAI-compatible Chat Completions provider
//!
//! Also serves Groq, OpenRouter, Ollama and other endpoints that speak the
//! same protocol.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{http_client, transport_error};
use crate::{
    error::{Error, Result},
    policy::Policy,
    types::{Content, Message, Model, PolicyRequest, Role, ToolSpec},
};

/// OpenAI-compatible API client
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    model: Model,
}

impl OpenAIProvider {
    /// Create a new provider; local endpoints such as Ollama need no key
    pub fn new(api_key: Option<String>, model: Model) -> Result<Self> {
        Ok(Self {
            client: http_client(&model)?,
            api_key,
            model,
        })
    }

    fn build_request(&self, request: &PolicyRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = request.effective_system_prompt() {
            messages.push(ChatMessage {
                role: "system",
                content: Some(system),
                tool_calls: None,
                tool_call_id: None,
            });
        }
        messages.extend(request.messages.iter().map(convert_message));

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(convert_tools(&request.tools))
        };

        ChatRequest {
            model: self.model.id.clone(),
            messages,
            max_tokens: request.max_tokens.unwrap_or(self.model.max_tokens),
            tools,
        }
    }
}

#[async_trait]
impl Policy for OpenAIProvider {
    async fn invoke(&self, request: PolicyRequest) -> Result<Message> {
        let body = self.build_request(&request);
        let url = format!("{}/chat/completions", self.model.base_url);
        tracing::debug!("Chat completions URL: {}", url);

        let mut builder = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }
        for (key, value) in &self.model.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let timeout_secs = self.model.request_timeout_secs;
        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(e, timeout_secs))?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(Error::RateLimited { retry_after: None });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<ErrorEnvelope>(&text) {
                Ok(envelope) => Error::api(
                    envelope.error.error_type.unwrap_or_else(|| "error".to_string()),
                    envelope.error.message,
                ),
                Err(_) => Error::api(format!("http_{}", status.as_u16()), text),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| transport_error(e, timeout_secs))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::UnexpectedResponse("response has no choices".to_string()))?;
        convert_choice(choice.message)
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    /// JSON-encoded arguments
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    error_type: Option<String>,
    message: String,
}

// ============================================================================
// Conversion functions
// ============================================================================

fn convert_message(message: &Message) -> ChatMessage {
    match message.role {
        Role::Human => ChatMessage {
            role: "user",
            content: Some(message.text()),
            tool_calls: None,
            tool_call_id: None,
        },
        Role::Ai => {
            let calls: Vec<serde_json::Value> = message
                .tool_calls()
                .into_iter()
                .map(|call| {
                    serde_json::json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string()
                        }
                    })
                })
                .collect();
            let text = message.text();
            ChatMessage {
                role: "assistant",
                content: if text.is_empty() { None } else { Some(text) },
                tool_calls: if calls.is_empty() { None } else { Some(calls) },
                tool_call_id: None,
            }
        }
        Role::Tool => ChatMessage {
            role: "tool",
            content: Some(message.text()),
            tool_calls: None,
            tool_call_id: message.tool_call_id.clone(),
        },
    }
}

fn convert_tools(tools: &[ToolSpec]) -> Vec<serde_json::Value> {
    tools
        .iter()
        .map(|tool| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters
                }
            })
        })
        .collect()
}

fn convert_choice(message: ResponseMessage) -> Result<Message> {
    let mut content = Vec::new();
    if let Some(text) = message.content.filter(|t| !t.is_empty()) {
        content.push(Content::text(text));
    }
    for call in message.tool_calls {
        let arguments = if call.function.arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&call.function.arguments)?
        };
        content.push(Content::tool_call(call.id, call.function.name, arguments));
    }
    Ok(Message::ai(content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Provider;

    #[test]
    fn test_system_prompt_comes_first() {
        let provider = OpenAIProvider::new(None, Model::new(Provider::Ollama, "llama3")).unwrap();
        let body = provider.build_request(&PolicyRequest::prompt("be brief", "hi"));
        assert_eq!(body.messages[0].role, "system");
        assert_eq!(body.messages[1].role, "user");
        assert_eq!(body.messages[1].content.as_deref(), Some("hi"));
    }

    #[test]
    fn test_tool_message_keeps_correlation_id() {
        let msg = Message::tool("call_1", "view_file", "contents", false);
        let converted = convert_message(&msg);
        assert_eq!(converted.role, "tool");
        assert_eq!(converted.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_convert_choice_parses_arguments() {
        let parsed: ChatResponse = serde_json::from_value(serde_json::json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "c1",
                        "type": "function",
                        "function": {"name": "run_shell", "arguments": "{\"command\":\"ls\"}"}
                    }]
                }
            }]
        }))
        .unwrap();
        let msg = convert_choice(parsed.choices.into_iter().next().unwrap().message).unwrap();
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["command"], "ls");
    }
}
