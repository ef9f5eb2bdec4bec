//! Anthropic Messages API adapter.
//!
//! Translates the normalized [`CompletionRequest`] into the Anthropic wire
//! shape (separate `system` parameter, content blocks, `tool_use` /
//! `tool_result` blocks) and back into a [`ProviderReply`].

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{
    CompletionRequest, LlmProvider, ProviderError, ProviderReply, Role, StopReason, TokenUsage,
    ToolCall,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Anthropic API provider.
#[derive(Debug)]
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout_secs: u64,
}

impl AnthropicProvider {
    /// Create a provider for the given key and model.
    #[must_use]
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Override the base URL (tests, proxies).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    fn build_request(&self, request: &CompletionRequest) -> AnthropicRequest {
        let messages = request
            .messages
            .iter()
            .map(|msg| match msg.role {
                Role::User => AnthropicMessage {
                    role: "user",
                    content: MessageContent::Text(msg.content.clone()),
                },
                Role::Assistant => AnthropicMessage {
                    role: "assistant",
                    content: MessageContent::Text(msg.content.clone()),
                },
                // Tool results travel as user-role content blocks.
                Role::Tool => AnthropicMessage {
                    role: "user",
                    content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                        content: msg.content.clone(),
                    }]),
                },
            })
            .collect();

        let tools: Vec<AnthropicTool> = request
            .tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect();

        AnthropicRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens,
            system: if request.system_prompt.is_empty() {
                None
            } else {
                Some(request.system_prompt.clone())
            },
            messages,
            tools: if tools.is_empty() { None } else { Some(tools) },
        }
    }
}

fn parse_reply(response: AnthropicResponse) -> ProviderReply {
    let mut text = None;
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block {
            ContentBlock::Text { text: t } => {
                text = Some(match text {
                    Some(existing) => format!("{existing}\n{t}"),
                    None => t,
                });
            }
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                });
            }
            ContentBlock::ToolResult { .. } | ContentBlock::Unknown => {}
        }
    }

    ProviderReply {
        text,
        tool_calls,
        usage: TokenUsage {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
        },
        stop_reason: parse_stop_reason(response.stop_reason.as_deref()),
    }
}

fn parse_stop_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("end_turn") | Some("stop_sequence") => StopReason::Stop,
        Some("max_tokens") => StopReason::MaxTokens,
        Some("tool_use") => StopReason::ToolUse,
        _ => StopReason::Unknown,
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
    /// Block types this adapter does not consume (e.g. thinking).
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn send(&self, request: &CompletionRequest) -> Result<ProviderReply, ProviderError> {
        let body = self.build_request(request);
        debug!(
            "Anthropic request: model={} messages={} tools={}",
            self.model,
            request.messages.len(),
            request.tools.len()
        );

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .timeout(Duration::from_secs(self.timeout_secs))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(&e, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<AnthropicErrorBody>(&raw)
                .map(|b| b.error.message)
                .unwrap_or(raw);
            return Err(ProviderError::from_status(status.as_u16(), message));
        }

        let parsed: AnthropicResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    provider: "anthropic".to_string(),
                    message: e.to_string(),
                })?;

        Ok(parse_reply(parsed))
    }

    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatMessage, ToolSpec};
    use serde_json::json;

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new("sk-test", "claude-sonnet-4-20250514")
    }

    fn request_with_tool_result() -> CompletionRequest {
        CompletionRequest {
            system_prompt: "Lead the team.".to_string(),
            messages: vec![
                ChatMessage::user("Task: plan the sprint"),
                ChatMessage::assistant("On it."),
                ChatMessage::tool_result("toolu_1", "created"),
            ],
            tools: vec![ToolSpec {
                name: "create_task".to_string(),
                description: "Create a task".to_string(),
                parameters: json!({"type": "object"}),
            }],
            max_tokens: 1024,
        }
    }

    #[test]
    fn test_build_request_shape() {
        let body = provider().build_request(&request_with_tool_result());
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["model"], "claude-sonnet-4-20250514");
        assert_eq!(json["system"], "Lead the team.");
        assert_eq!(json["max_tokens"], 1024);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "Task: plan the sprint");
        // Tool results ride as user-role blocks.
        assert_eq!(json["messages"][2]["role"], "user");
        assert_eq!(json["messages"][2]["content"][0]["type"], "tool_result");
        assert_eq!(json["messages"][2]["content"][0]["tool_use_id"], "toolu_1");
        assert_eq!(json["tools"][0]["name"], "create_task");
        assert!(json["tools"][0]["input_schema"].is_object());
    }

    #[test]
    fn test_build_request_omits_empty_system_and_tools() {
        let body = provider().build_request(&CompletionRequest {
            system_prompt: String::new(),
            messages: vec![ChatMessage::user("hi")],
            tools: Vec::new(),
            max_tokens: 64,
        });
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("system").is_none());
        assert!(json.get("tools").is_none());
    }

    #[test]
    fn test_parse_reply_text_and_tool_use() {
        let response: AnthropicResponse = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "Planning now."},
                {"type": "tool_use", "id": "toolu_9", "name": "create_task",
                 "input": {"title": "Write release notes"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 321, "output_tokens": 54}
        }))
        .unwrap();

        let reply = parse_reply(response);
        assert_eq!(reply.text.as_deref(), Some("Planning now."));
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].name, "create_task");
        assert_eq!(reply.tool_calls[0].arguments["title"], "Write release notes");
        assert_eq!(reply.stop_reason, StopReason::ToolUse);
        assert_eq!(reply.usage.input_tokens, 321);
        assert_eq!(reply.usage.output_tokens, 54);
    }

    #[test]
    fn test_parse_reply_tolerates_unknown_blocks() {
        let response: AnthropicResponse = serde_json::from_value(json!({
            "content": [
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "done"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 1, "output_tokens": 1}
        }))
        .unwrap();

        let reply = parse_reply(response);
        assert_eq!(reply.text.as_deref(), Some("done"));
        assert_eq!(reply.stop_reason, StopReason::Stop);
    }

    #[test]
    fn test_parse_stop_reason_mapping() {
        assert_eq!(parse_stop_reason(Some("end_turn")), StopReason::Stop);
        assert_eq!(parse_stop_reason(Some("stop_sequence")), StopReason::Stop);
        assert_eq!(parse_stop_reason(Some("max_tokens")), StopReason::MaxTokens);
        assert_eq!(parse_stop_reason(Some("tool_use")), StopReason::ToolUse);
        assert_eq!(parse_stop_reason(Some("weird")), StopReason::Unknown);
        assert_eq!(parse_stop_reason(None), StopReason::Unknown);
    }

    #[test]
    fn test_builder_overrides() {
        let provider = provider()
            .with_base_url("http://localhost:9999/v1")
            .with_timeout(5);
        assert_eq!(provider.base_url, "http://localhost:9999/v1");
        assert_eq!(provider.timeout_secs, 5);
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.model(), "claude-sonnet-4-20250514");
    }
}
