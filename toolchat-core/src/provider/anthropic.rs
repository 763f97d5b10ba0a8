//! Anthropic Messages API
//!
//! Tool calls are `tool_use` blocks on assistant messages; their answers are
//! `tool_result` blocks on user messages. The API wants roles to alternate,
//! so adjacent user-side messages are folded into one.

use super::http;
use super::*;
use reqwest::Client;

const API_VERSION: &str = "2023-06-01";

/// Required by the API; used when the request does not set one
const DEFAULT_MAX_TOKENS: usize = 4096;

pub struct AnthropicProvider {
    client: Client,
    config: ProviderConfig,
    models: Vec<String>,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> crate::error::Result<Self> {
        Ok(Self {
            client: http::client(&config)?,
            models: config.model_list(),
            config,
        })
    }

    fn encode(&self, request: CompletionRequest) -> wire::Request {
        let mut system = None;
        let mut messages: Vec<wire::Message> = Vec::new();
        for msg in request.messages {
            if msg.role == Role::System {
                system = msg.content;
                continue;
            }
            let next = wire::Message::from(msg);
            match messages.last_mut() {
                Some(prev) if prev.role == "user" && next.role == "user" => {
                    prev.content.extend(next.content)
                }
                _ => messages.push(next),
            }
        }

        wire::Request {
            model: request
                .model
                .unwrap_or_else(|| self.config.default_model.clone()),
            system,
            messages,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: request.temperature,
            tools: request.tools.into_iter().map(wire::Tool::from).collect(),
        }
    }
}

impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn models(&self) -> Vec<String> {
        self.models.clone()
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        if self.config.api_key.is_empty() {
            return Err(ProviderError::Unauthorized);
        }
        let body = self.encode(request);
        let req = http::post(&self.client, &self.config, "messages", &body)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION);

        tracing::debug!(model = %body.model, messages = body.messages.len(), "anthropic request");
        let reply: wire::Response = http::send(req, &body.model)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        Ok(reply.into_completion())
    }
}

/// JSON shapes of the Messages API
mod wire {
    use crate::provider::{ChatMessage, CompletionResponse, FinishReason, Role, ToolCall, ToolDefinition, Usage};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize)]
    pub struct Request {
        pub model: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub system: Option<String>,
        pub messages: Vec<Message>,
        pub max_tokens: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub temperature: Option<f32>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub tools: Vec<Tool>,
    }

    #[derive(Debug, Serialize)]
    pub struct Message {
        pub role: &'static str,
        pub content: Vec<Block>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub enum Block {
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
        /// Thinking and other blocks this client does not use
        #[serde(other, skip_serializing)]
        Ignored,
    }

    impl From<ChatMessage> for Message {
        fn from(msg: ChatMessage) -> Self {
            if msg.role == Role::Tool {
                return Self {
                    role: "user",
                    content: vec![Block::ToolResult {
                        tool_use_id: msg.tool_call_id.unwrap_or_default(),
                        content: msg.content.unwrap_or_default(),
                    }],
                };
            }

            let text = msg
                .content
                .filter(|t| !t.is_empty())
                .map(|text| Block::Text { text });
            let calls = msg.tool_calls.into_iter().map(|call| Block::ToolUse {
                // Arguments that are not JSON travel as a string value
                input: serde_json::from_str(&call.arguments)
                    .unwrap_or(serde_json::Value::String(call.arguments)),
                id: call.id,
                name: call.name,
            });
            Self {
                role: if msg.role == Role::Assistant { "assistant" } else { "user" },
                content: text.into_iter().chain(calls).collect(),
            }
        }
    }

    #[derive(Debug, Serialize)]
    pub struct Tool {
        pub name: String,
        pub description: String,
        pub input_schema: serde_json::Value,
    }

    impl From<ToolDefinition> for Tool {
        fn from(def: ToolDefinition) -> Self {
            Self {
                name: def.name,
                description: def.description,
                input_schema: def.parameters,
            }
        }
    }

    #[derive(Debug, Deserialize)]
    pub struct Response {
        #[serde(default)]
        pub model: String,
        pub content: Vec<Block>,
        pub stop_reason: Option<String>,
        pub usage: TokenCounts,
    }

    #[derive(Debug, Deserialize)]
    pub struct TokenCounts {
        pub input_tokens: usize,
        pub output_tokens: usize,
    }

    impl Response {
        pub fn into_completion(self) -> CompletionResponse {
            let mut text = String::new();
            let mut tool_calls = Vec::new();
            for block in self.content {
                match block {
                    Block::Text { text: t } => text.push_str(&t),
                    Block::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                        id,
                        name,
                        arguments: input.to_string(),
                    }),
                    Block::ToolResult { .. } | Block::Ignored => {}
                }
            }

            CompletionResponse {
                model: self.model,
                content: Some(text).filter(|t| !t.is_empty()),
                tool_calls,
                finish_reason: self
                    .stop_reason
                    .as_deref()
                    .map_or(FinishReason::Unknown, FinishReason::parse),
                usage: Usage::new(self.usage.input_tokens, self.usage.output_tokens),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new(ProviderConfig::anthropic("sk-ant-test")).unwrap()
    }

    fn shell_call(id: &str, command: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: "execute_shell_command".into(),
            arguments: serde_json::json!({ "command": command }).to_string(),
        }
    }

    #[test]
    fn test_tool_results_fold_into_one_user_message() {
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("two things"),
            ChatMessage::assistant_tool_calls(vec![shell_call("a", "ls"), shell_call("b", "pwd")]),
            ChatMessage::tool_result("b", "/root"),
            ChatMessage::tool_result("a", "file"),
        ];
        let body = serde_json::to_value(provider().encode(CompletionRequest::new(messages))).unwrap();

        assert_eq!(body["system"], "sys");
        assert_eq!(body["max_tokens"], 4096);
        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[1]["content"][0]["type"], "tool_use");
        assert_eq!(msgs[1]["content"][0]["input"]["command"], "ls");
        assert_eq!(msgs[2]["role"], "user");
        assert_eq!(msgs[2]["content"].as_array().unwrap().len(), 2);
        assert_eq!(msgs[2]["content"][0]["tool_use_id"], "b");
    }

    #[test]
    fn test_unparsable_arguments_are_sent_as_text() {
        let mut call = shell_call("a", "ls");
        call.arguments = "not json".into();
        let body = serde_json::to_value(provider().encode(CompletionRequest::new(vec![
            ChatMessage::user("go"),
            ChatMessage::assistant_tool_calls(vec![call]),
        ])))
        .unwrap();
        assert_eq!(body["messages"][1]["content"][0]["input"], "not json");
    }

    #[test]
    fn test_reply_conversion_skips_unknown_blocks() {
        let raw = r#"{"model":"claude","stop_reason":"tool_use",
            "content":[{"type":"text","text":"Let me look."},
                       {"type":"tool_use","id":"tu_1","name":"execute_shell_command","input":{"command":"ls"}},
                       {"type":"thinking","thinking":"..."}],
            "usage":{"input_tokens":10,"output_tokens":5}}"#;
        let reply: wire::Response = serde_json::from_str(raw).unwrap();
        let response = reply.into_completion();

        assert_eq!(response.content.as_deref(), Some("Let me look."));
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        assert_eq!(response.tool_calls[0].arguments, r#"{"command":"ls"}"#);
        assert_eq!(response.usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn test_missing_key_is_rejected_before_sending() {
        let provider = AnthropicProvider::new(ProviderConfig::anthropic("")).unwrap();
        let result = provider
            .complete(CompletionRequest::new(vec![ChatMessage::user("hi")]))
            .await;
        assert!(matches!(result, Err(ProviderError::Unauthorized)));
    }
}
