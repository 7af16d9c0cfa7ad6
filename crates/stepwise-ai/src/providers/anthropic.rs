//! Anthropic Messages API provider

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{http_client, transport_error};
use crate::{
    error::{Error, Result},
    policy::Policy,
    types::{Content, Message, Model, PolicyRequest, Role, ToolSpec},
};

/// Anthropic API client
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: Model,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider with an API key
    pub fn new(api_key: impl Into<String>, model: Model) -> Result<Self> {
        Ok(Self {
            client: http_client(&model)?,
            api_key: api_key.into(),
            model,
        })
    }

    fn headers(&self) -> Result<reqwest::header::HeaderMap> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "x-api-key",
            self.api_key.parse().map_err(|_| Error::InvalidApiKey)?,
        );
        headers.insert(
            "anthropic-version",
            reqwest::header::HeaderValue::from_static("2023-06-01"),
        );
        headers.insert(
            "content-type",
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        for (key, value) in &self.model.headers {
            if let (Ok(name), Ok(val)) = (
                key.parse::<reqwest::header::HeaderName>(),
                value.parse::<reqwest::header::HeaderValue>(),
            ) {
                headers.insert(name, val);
            }
        }
        Ok(headers)
    }

    fn build_request(&self, request: &PolicyRequest) -> AnthropicRequest {
        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(convert_tools(&request.tools))
        };

        AnthropicRequest {
            model: self.model.id.clone(),
            messages: convert_messages(&request.messages),
            max_tokens: request.max_tokens.unwrap_or(self.model.max_tokens),
            system: request.effective_system_prompt(),
            tools,
        }
    }
}

#[async_trait]
impl Policy for AnthropicProvider {
    async fn invoke(&self, request: PolicyRequest) -> Result<Message> {
        let body = self.build_request(&request);
        let url = format!("{}/v1/messages", self.model.base_url);
        tracing::debug!("Anthropic API URL: {}", url);

        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, self.model.request_timeout_secs))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(Error::RateLimited { retry_after });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<ErrorEnvelope>(&text) {
                Ok(envelope) => Error::api(envelope.error.error_type, envelope.error.message),
                Err(_) => Error::api(format!("http_{}", status.as_u16()), text),
            });
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| transport_error(e, self.model.request_timeout_secs))?;
        Ok(Message::ai(convert_response(parsed.content)))
    }
}

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

// ============================================================================
// Conversion functions
// ============================================================================

fn convert_messages(messages: &[Message]) -> Vec<AnthropicMessage> {
    let mut result: Vec<AnthropicMessage> = vec![];

    for message in messages {
        let (role, blocks): (&'static str, Vec<serde_json::Value>) = match message.role {
            Role::Human => (
                "user",
                message
                    .content
                    .iter()
                    .filter_map(|c| c.as_text())
                    .map(|text| serde_json::json!({ "type": "text", "text": text }))
                    .collect(),
            ),
            Role::Ai => (
                "assistant",
                message
                    .content
                    .iter()
                    .map(|c| match c {
                        Content::Text { text } => serde_json::json!({ "type": "text", "text": text }),
                        Content::Thinking { thinking } => serde_json::json!({
                            "type": "text",
                            "text": format!("<thinking>\n{}\n</thinking>", thinking)
                        }),
                        Content::ToolCall {
                            id,
                            name,
                            arguments,
                        } => serde_json::json!({
                            "type": "tool_use",
                            "id": id,
                            "name": name,
                            "input": arguments
                        }),
                    })
                    .collect(),
            ),
            Role::Tool => (
                "user",
                vec![serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                    "content": message.text(),
                    "is_error": message.is_error
                })],
            ),
        };

        if blocks.is_empty() {
            continue;
        }

        // Consecutive tool results (and a human message after them) share one
        // user turn, since the API requires alternating roles.
        match result.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => result.push(AnthropicMessage {
                role,
                content: blocks,
            }),
        }
    }

    result
}

fn convert_tools(tools: &[ToolSpec]) -> Vec<AnthropicTool> {
    tools
        .iter()
        .map(|tool| {
            let input_schema = if tool.parameters.is_object() {
                let mut schema = tool.parameters.clone();
                if let Some(obj) = schema.as_object_mut() {
                    obj.entry("type").or_insert(serde_json::json!("object"));
                }
                schema
            } else {
                serde_json::json!({
                    "type": "object",
                    "properties": {},
                    "required": []
                })
            };

            AnthropicTool {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema,
            }
        })
        .collect()
}

fn convert_response(blocks: Vec<ResponseBlock>) -> Vec<Content> {
    blocks
        .into_iter()
        .filter_map(|block| match block {
            ResponseBlock::Text { text } => Some(Content::Text { text }),
            ResponseBlock::Thinking { thinking } => Some(Content::Thinking { thinking }),
            ResponseBlock::ToolUse { id, name, input } => Some(Content::ToolCall {
                id,
                name,
                arguments: input,
            }),
            ResponseBlock::Other => None,
        })
        .collect()
}
