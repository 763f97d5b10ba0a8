//! OpenAI-compatible chat completions
//!
//! Also serves vLLM, Ollama and other servers exposing `/chat/completions`.

use super::http;
use super::*;
use futures_util::StreamExt;
use reqwest::Client;

pub struct OpenAIProvider {
    client: Client,
    config: ProviderConfig,
    models: Vec<String>,
}

impl OpenAIProvider {
    pub fn new(config: ProviderConfig) -> crate::error::Result<Self> {
        Ok(Self {
            client: http::client(&config)?,
            models: config.model_list(),
            config,
        })
    }

    fn encode(&self, request: CompletionRequest, stream: bool) -> wire::Request {
        let tool_choice = (!request.tools.is_empty()).then_some("auto");
        wire::Request {
            model: request
                .model
                .unwrap_or_else(|| self.config.default_model.clone()),
            messages: request.messages.into_iter().map(wire::Message::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
            tools: request.tools.into_iter().map(wire::Tool::from).collect(),
            tool_choice,
        }
    }

    async fn post(&self, body: &wire::Request) -> Result<reqwest::Response, ProviderError> {
        let mut req = http::post(&self.client, &self.config, "chat/completions", body);
        // Local servers often run without a key
        if !self.config.api_key.is_empty() {
            req = req.bearer_auth(&self.config.api_key);
        }
        tracing::debug!(model = %body.model, stream = body.stream, "openai request");
        http::send(req, &body.model).await
    }
}

impl LlmProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn models(&self) -> Vec<String> {
        self.models.clone()
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        if request.stream || self.config.stream {
            let model = request
                .model
                .clone()
                .unwrap_or_else(|| self.config.default_model.clone());
            return self.stream(request).await?.collect_response(&model).await;
        }

        let body = self.encode(request, false);
        let reply: wire::Response = self
            .post(&body)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        reply.into_completion()
    }

    async fn stream(&self, request: CompletionRequest) -> Result<StreamReceiver, ProviderError> {
        let body = self.encode(request, true);
        let events = http::sse_data(self.post(&body).await?);

        let chunks = async_stream::stream! {
            futures_util::pin_mut!(events);
            while let Some(event) = events.next().await {
                let data = match event {
                    Ok(data) => data,
                    Err(e) => {
                        yield StreamChunk::Error(e);
                        return;
                    }
                };
                let Some(parsed) = parse_stream_event(&data) else {
                    return;
                };
                for chunk in parsed {
                    yield chunk;
                }
            }
        };
        Ok(StreamReceiver::new(chunks))
    }
}

/// Chunks carried by one SSE payload; `None` at the `[DONE]` sentinel.
/// Payloads that do not parse are skipped.
fn parse_stream_event(data: &str) -> Option<Vec<StreamChunk>> {
    if data == "[DONE]" {
        return None;
    }
    let event: wire::StreamEvent = match serde_json::from_str(data) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(error = %e, "skipping unparsable stream event");
            return Some(Vec::new());
        }
    };

    let usage = event.usage.map(Usage::from);
    let mut chunks = Vec::new();
    for choice in event.choices {
        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            chunks.push(StreamChunk::Text(text));
        }
        for call in choice.delta.tool_calls {
            let function = call.function.unwrap_or_default();
            chunks.push(StreamChunk::ToolCallDelta {
                index: call.index,
                id: call.id,
                name: function.name,
                arguments_delta: function.arguments,
            });
        }
        if let Some(reason) = choice.finish_reason {
            chunks.push(StreamChunk::Done {
                finish_reason: FinishReason::parse(&reason),
                usage,
            });
        }
    }
    Some(chunks)
}

/// JSON shapes of the chat completions API
mod wire {
    use crate::provider::{ChatMessage, CompletionResponse, FinishReason, ProviderError, ToolCall, ToolDefinition, Usage};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize)]
    pub struct Request {
        pub model: String,
        pub messages: Vec<Message>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub temperature: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub max_tokens: Option<usize>,
        pub stream: bool,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub tools: Vec<Tool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub tool_choice: Option<&'static str>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct Message {
        pub role: String,
        #[serde(default)]
        pub content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub tool_calls: Vec<Call>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub tool_call_id: Option<String>,
    }

    impl From<ChatMessage> for Message {
        fn from(msg: ChatMessage) -> Self {
            Self {
                role: msg.role.as_str().to_string(),
                content: msg.content,
                tool_calls: msg.tool_calls.into_iter().map(Call::from).collect(),
                tool_call_id: msg.tool_call_id,
            }
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct Call {
        pub id: String,
        #[serde(rename = "type", default = "function")]
        pub kind: String,
        pub function: FunctionCall,
    }

    fn function() -> String {
        "function".to_string()
    }

    impl From<ToolCall> for Call {
        fn from(call: ToolCall) -> Self {
            Self {
                id: call.id,
                kind: function(),
                function: FunctionCall {
                    name: call.name,
                    arguments: call.arguments,
                },
            }
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct FunctionCall {
        pub name: String,
        #[serde(default)]
        pub arguments: String,
    }

    #[derive(Debug, Serialize)]
    pub struct Tool {
        #[serde(rename = "type")]
        pub kind: &'static str,
        pub function: FunctionSpec,
    }

    #[derive(Debug, Serialize)]
    pub struct FunctionSpec {
        pub name: String,
        pub description: String,
        pub parameters: serde_json::Value,
    }

    impl From<ToolDefinition> for Tool {
        fn from(def: ToolDefinition) -> Self {
            Self {
                kind: "function",
                function: FunctionSpec {
                    name: def.name,
                    description: def.description,
                    parameters: def.parameters,
                },
            }
        }
    }

    #[derive(Debug, Deserialize)]
    pub struct Response {
        #[serde(default)]
        pub model: String,
        pub choices: Vec<Choice>,
        pub usage: Option<TokenCounts>,
    }

    impl Response {
        pub fn into_completion(self) -> Result<CompletionResponse, ProviderError> {
            let choice = self
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::Malformed("reply has no choices".into()))?;
            Ok(CompletionResponse {
                model: self.model,
                content: choice.message.content,
                tool_calls: choice
                    .message
                    .tool_calls
                    .into_iter()
                    .map(|call| ToolCall {
                        id: call.id,
                        name: call.function.name,
                        arguments: call.function.arguments,
                    })
                    .collect(),
                finish_reason: choice
                    .finish_reason
                    .as_deref()
                    .map_or(FinishReason::Unknown, FinishReason::parse),
                usage: self.usage.map(Usage::from).unwrap_or_default(),
            })
        }
    }

    #[derive(Debug, Deserialize)]
    pub struct Choice {
        pub message: Message,
        pub finish_reason: Option<String>,
    }

    #[derive(Debug, Clone, Copy, Deserialize)]
    pub struct TokenCounts {
        pub prompt_tokens: usize,
        pub completion_tokens: usize,
    }

    impl From<TokenCounts> for Usage {
        fn from(counts: TokenCounts) -> Self {
            Usage::new(counts.prompt_tokens, counts.completion_tokens)
        }
    }

    #[derive(Debug, Deserialize)]
    pub struct StreamEvent {
        #[serde(default)]
        pub choices: Vec<StreamChoice>,
        pub usage: Option<TokenCounts>,
    }

    #[derive(Debug, Deserialize)]
    pub struct StreamChoice {
        pub delta: Delta,
        pub finish_reason: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Delta {
        pub content: Option<String>,
        #[serde(default)]
        pub tool_calls: Vec<CallDelta>,
    }

    #[derive(Debug, Deserialize)]
    pub struct CallDelta {
        pub index: usize,
        pub id: Option<String>,
        pub function: Option<FunctionDelta>,
    }

    #[derive(Debug, Default, Deserialize)]
    pub struct FunctionDelta {
        pub name: Option<String>,
        pub arguments: Option<String>,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAIProvider {
        OpenAIProvider::new(ProviderConfig::openai("sk-test").with_base_url("http://localhost:1/v1/"))
            .unwrap()
    }

    fn shell_tool() -> ToolDefinition {
        ToolDefinition {
            name: "execute_shell_command".into(),
            description: "Run".into(),
            parameters: serde_json::json!({"type": "object"}),
        }
    }

    #[test]
    fn test_request_carries_tool_calls_and_results() {
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("list /tmp"),
            ChatMessage::assistant_tool_calls(vec![ToolCall {
                id: "call_1".into(),
                name: "execute_shell_command".into(),
                arguments: r#"{"command":"ls /tmp"}"#.into(),
            }]),
            ChatMessage::tool_result("call_1", "a\nb"),
        ];
        let request = CompletionRequest::new(messages).with_tools(vec![shell_tool()]);
        let body = serde_json::to_value(provider().encode(request, false)).unwrap();

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["messages"][2]["tool_calls"][0]["function"]["name"], "execute_shell_command");
        assert_eq!(body["messages"][3]["role"], "tool");
        assert_eq!(body["messages"][3]["tool_call_id"], "call_1");
        assert!(body.get("temperature").is_none());
        assert!(body["messages"][0].get("tool_calls").is_none());
    }

    #[test]
    fn test_request_without_tools_omits_choice() {
        let body = serde_json::to_value(
            provider().encode(CompletionRequest::new(vec![ChatMessage::user("hi")]), true),
        )
        .unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn test_configured_models_override_builtin_list() {
        let p = OpenAIProvider::new(ProviderConfig::openai("k").with_models(vec!["local-llm".into()]))
            .unwrap();
        assert_eq!(p.models(), vec!["local-llm".to_string()]);
        assert_eq!(provider().models().len(), 5);
    }

    #[test]
    fn test_decode_tool_call_reply() {
        let raw = r#"{"model":"gpt-4o","choices":[{"message":{"role":"assistant","content":null,
            "tool_calls":[{"id":"c1","type":"function","function":{"name":"t","arguments":"{}"}}]},
            "finish_reason":"tool_calls"}],"usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#;
        let reply: wire::Response = serde_json::from_str(raw).unwrap();
        let response = reply.into_completion().unwrap();

        assert!(response.content.is_none());
        assert_eq!(response.tool_calls[0].name, "t");
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        assert_eq!(response.usage.total_tokens, 5);

        let empty: wire::Response = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(empty.into_completion(), Err(ProviderError::Malformed(_))));
    }

    #[test]
    fn test_stream_event_parsing() {
        let chunks = parse_stream_event(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"t","arguments":"{\"a"}}]},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert!(matches!(
            &chunks[..],
            [StreamChunk::ToolCallDelta { index: 0, id: Some(id), .. }] if id == "c1"
        ));

        let chunks = parse_stream_event(r#"{"choices":[{"delta":{"content":"hi"},"finish_reason":"stop"}]}"#)
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(matches!(chunks[1], StreamChunk::Done { finish_reason: FinishReason::Stop, .. }));

        assert!(parse_stream_event("[DONE]").is_none());
        assert!(parse_stream_event("not json").unwrap().is_empty());
    }
}
