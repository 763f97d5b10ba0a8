//! # LLM providers
//!
//! Wire-level clients for chat-completion endpoints that support tool
//! calling. A provider speaks in [`ChatMessage`]s and [`CompletionResponse`]s;
//! the turn-level [`crate::gateway`] translates transcripts to and from them.
//!
//! - [`openai::OpenAIProvider`]: `/chat/completions`, function tools, optional SSE
//! - [`anthropic::AnthropicProvider`]: `/messages`, `tool_use`/`tool_result` blocks
//!
//! Streaming is internal to a provider: a [`StreamReceiver`] is always folded
//! back into one complete response before the gateway sees it.

pub mod anthropic;
mod http;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAIProvider;

use crate::error::{Error, ErrorKind};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// One provider-neutral chat message.
///
/// An assistant message may carry tool calls instead of (or next to) text;
/// a tool message answers exactly one call through `tool_call_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn of(role: Role, content: Option<String>) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::of(Role::System, Some(content.into()))
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::of(Role::User, Some(content.into()))
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::of(Role::Assistant, Some(content.into()))
    }

    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::of(Role::Assistant, None)
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::of(Role::Tool, Some(content.into()))
        }
    }
}

/// A function the model may call, with its JSON-schema parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A call requested by the model. `arguments` is the raw JSON text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

// ============================================================================
// Requests and responses
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Provider default when unset
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    /// Offered tools; the model chooses freely among them
    pub tools: Vec<ToolDefinition>,
    pub stream: bool,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub model: String,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Unknown,
}

impl FinishReason {
    /// Accepts both OpenAI and Anthropic spellings
    pub fn parse(reason: &str) -> Self {
        match reason {
            "stop" | "end_turn" | "stop_sequence" => FinishReason::Stop,
            "length" | "max_tokens" => FinishReason::Length,
            "tool_calls" | "tool_use" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl Usage {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Incremental piece of a streamed reply
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Text(String),
    /// Fragment of the tool call at `index`; fields arrive piecemeal
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments_delta: Option<String>,
    },
    Done {
        finish_reason: FinishReason,
        usage: Option<Usage>,
    },
    /// The transport broke mid-stream
    Error(String),
}

// ============================================================================
// Provider errors
// ============================================================================

/// Failure talking to a provider, before it is classified into an [`Error`]
#[derive(Debug)]
pub enum ProviderError {
    /// Connection could not be made or broke
    Network(String),
    /// Non-success HTTP status not covered below
    Status { code: u16, body: String },
    RateLimited { retry_after: Option<u64> },
    Unauthorized,
    ModelNotFound(String),
    /// The reply arrived but could not be understood
    Malformed(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(e) => write!(f, "cannot reach the model endpoint: {}", e),
            Self::Status { code, body } if body.is_empty() => write!(f, "endpoint answered HTTP {}", code),
            Self::Status { code, body } => write!(f, "endpoint answered HTTP {}: {}", code, body),
            Self::RateLimited { retry_after: Some(secs) } => {
                write!(f, "rate limited, retry after {}s", secs)
            }
            Self::RateLimited { retry_after: None } => write!(f, "rate limited"),
            Self::Unauthorized => write!(f, "the API key was rejected"),
            Self::ModelNotFound(model) => write!(f, "unknown model '{}'", model),
            Self::Malformed(e) => write!(f, "unusable reply: {}", e),
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::NetworkFailed,
            Self::Status { code, .. } if *code >= 500 => ErrorKind::ProviderUnavailable,
            Self::Status { .. } | Self::Malformed(_) => ErrorKind::InferenceFailed,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Unauthorized => ErrorKind::AuthenticationFailed,
            Self::ModelNotFound(_) => ErrorKind::ConfigInvalid,
        }
    }

    /// Classify into the shared error type. Status codes and retry hints
    /// travel as context.
    pub fn into_error(self) -> Error {
        let mut err = Error::new(self.kind(), self.to_string()).with_operation("provider");
        match &self {
            Self::Status { code, .. } => err = err.with_context("http_status", code.to_string()),
            Self::RateLimited {
                retry_after: Some(secs),
            } => err = err.with_context("retry_after", secs.to_string()),
            _ => {}
        }
        err
    }
}

// ============================================================================
// Provider trait
// ============================================================================

#[allow(async_fn_in_trait)]
pub trait LlmProvider: Send + Sync {
    /// Short identifier, e.g. "openai"
    fn name(&self) -> &str;

    /// Models offered for switching, in cycle order
    fn models(&self) -> Vec<String>;

    fn default_model(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;

    /// Stream the reply. Without a streaming endpoint the full response is
    /// replayed as chunks.
    async fn stream(&self, request: CompletionRequest) -> Result<StreamReceiver, ProviderError> {
        let response = self.complete(request).await?;
        Ok(StreamReceiver::from_response(response))
    }
}

/// A streamed reply in progress
pub struct StreamReceiver {
    inner: Pin<Box<dyn futures_core::Stream<Item = StreamChunk> + Send>>,
}

impl StreamReceiver {
    pub fn new<S>(stream: S) -> Self
    where
        S: futures_core::Stream<Item = StreamChunk> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    pub fn from_response(response: CompletionResponse) -> Self {
        let text = response.content.map(StreamChunk::Text);
        let calls = response
            .tool_calls
            .into_iter()
            .enumerate()
            .map(|(index, tc)| StreamChunk::ToolCallDelta {
                index,
                id: Some(tc.id),
                name: Some(tc.name),
                arguments_delta: Some(tc.arguments),
            });
        let done = StreamChunk::Done {
            finish_reason: response.finish_reason,
            usage: Some(response.usage),
        };
        let chunks: Vec<StreamChunk> = text.into_iter().chain(calls).chain([done]).collect();
        Self::new(futures_util::stream::iter(chunks))
    }

    /// Fold the stream into one response.
    ///
    /// Tool call fragments are assembled per index and ordered by index;
    /// argument fragments are concatenated in arrival order.
    pub async fn collect_response(mut self, model: &str) -> Result<CompletionResponse, ProviderError> {
        let mut text = String::new();
        let mut calls: BTreeMap<usize, ToolCall> = BTreeMap::new();
        let mut finish_reason = FinishReason::Unknown;
        let mut usage = Usage::default();

        while let Some(chunk) = self.inner.next().await {
            match chunk {
                StreamChunk::Text(t) => text.push_str(&t),
                StreamChunk::ToolCallDelta {
                    index,
                    id,
                    name,
                    arguments_delta,
                } => {
                    let call = calls.entry(index).or_insert_with(|| ToolCall {
                        id: String::new(),
                        name: String::new(),
                        arguments: String::new(),
                    });
                    if let Some(id) = id {
                        call.id = id;
                    }
                    call.name.push_str(name.as_deref().unwrap_or_default());
                    call.arguments
                        .push_str(arguments_delta.as_deref().unwrap_or_default());
                }
                StreamChunk::Done {
                    finish_reason: reason,
                    usage: reported,
                } => {
                    finish_reason = reason;
                    usage = reported.unwrap_or(usage);
                }
                StreamChunk::Error(e) => return Err(ProviderError::Network(e)),
            }
        }

        Ok(CompletionResponse {
            model: model.to_string(),
            content: Some(text).filter(|t| !t.is_empty()),
            tool_calls: calls.into_values().collect(),
            finish_reason,
            usage,
        })
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    OpenAI,
    Anthropic,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::OpenAI => "openai",
            ProviderType::Anthropic => "anthropic",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderType::OpenAI => "https://api.openai.com/v1",
            ProviderType::Anthropic => "https://api.anthropic.com/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderType::OpenAI => "gpt-4o",
            ProviderType::Anthropic => "claude-sonnet-4-20250514",
        }
    }

    /// Switch list used when none is configured
    pub fn builtin_models(&self) -> &'static [&'static str] {
        match self {
            ProviderType::OpenAI => &["gpt-4o", "gpt-4o-mini", "gpt-4-turbo", "o1", "o1-mini"],
            ProviderType::Anthropic => &[
                "claude-sonnet-4-20250514",
                "claude-opus-4-20250514",
                "claude-3-5-haiku-20241022",
            ],
        }
    }
}

impl std::str::FromStr for ProviderType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderType::OpenAI),
            "anthropic" => Ok(ProviderType::Anthropic),
            other => Err(Error::config_invalid(format!("unknown provider '{}'", other))),
        }
    }
}

/// Everything needed to build a provider client
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider_type: ProviderType,
    pub api_key: String,
    pub base_url: String,
    pub default_model: String,
    /// Switch list; empty means the built-in list
    pub models: Vec<String>,
    /// Extra headers sent with every request
    pub headers: Vec<(String, String)>,
    pub timeout_secs: u64,
    /// Request SSE streaming for every completion
    pub stream: bool,
}

impl ProviderConfig {
    pub fn new(provider_type: ProviderType, api_key: impl Into<String>) -> Self {
        Self {
            provider_type,
            api_key: api_key.into(),
            base_url: provider_type.default_base_url().to_string(),
            default_model: provider_type.default_model().to_string(),
            models: Vec::new(),
            headers: Vec::new(),
            timeout_secs: 120,
            stream: false,
        }
    }

    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new(ProviderType::OpenAI, api_key)
    }

    pub fn anthropic(api_key: impl Into<String>) -> Self {
        Self::new(ProviderType::Anthropic, api_key)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Base URL without a trailing slash
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Configured switch list, else the built-in one
    pub fn model_list(&self) -> Vec<String> {
        if self.models.is_empty() {
            self.provider_type
                .builtin_models()
                .iter()
                .map(|m| m.to_string())
                .collect()
        } else {
            self.models.clone()
        }
    }
}

// ============================================================================
// Usage accounting
// ============================================================================

/// Token totals across calls, overall and per model
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    pub calls: usize,
    pub total: Usage,
    pub per_model: BTreeMap<String, Usage>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, model: &str, usage: &Usage) {
        fn add(into: &mut Usage, usage: &Usage) {
            into.prompt_tokens += usage.prompt_tokens;
            into.completion_tokens += usage.completion_tokens;
            into.total_tokens += usage.total_tokens;
        }
        self.calls += 1;
        add(&mut self.total, usage);
        add(self.per_model.entry(model.to_string()).or_default(), usage);
    }

    pub fn total_tokens(&self) -> usize {
        self.total.total_tokens
    }
}

impl fmt::Display for UsageTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} model calls, {} tokens ({} prompt, {} completion)",
            self.calls, self.total.total_tokens, self.total.prompt_tokens, self.total.completion_tokens
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(index: usize, id: Option<&str>, name: Option<&str>, args: &str) -> StreamChunk {
        StreamChunk::ToolCallDelta {
            index,
            id: id.map(str::to_string),
            name: name.map(str::to_string),
            arguments_delta: Some(args.to_string()),
        }
    }

    #[test]
    fn test_message_constructors() {
        let msg = ChatMessage::tool_result("call_1", "ok");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));

        let msg = ChatMessage::assistant_tool_calls(vec![ToolCall {
            id: "c".into(),
            name: "t".into(),
            arguments: "{}".into(),
        }]);
        assert_eq!(msg.content, None);
        assert_eq!(msg.tool_calls.len(), 1);
    }

    #[test]
    fn test_provider_error_classification() {
        assert_eq!(ProviderError::Network("reset".into()).kind(), ErrorKind::NetworkFailed);
        assert_eq!(
            ProviderError::Status { code: 503, body: String::new() }.kind(),
            ErrorKind::ProviderUnavailable
        );
        assert_eq!(
            ProviderError::Status { code: 400, body: String::new() }.kind(),
            ErrorKind::InferenceFailed
        );
        assert_eq!(ProviderError::Unauthorized.kind(), ErrorKind::AuthenticationFailed);

        let err = ProviderError::RateLimited { retry_after: Some(3) }.into_error();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert!(err.is_retryable());
        assert_eq!(err.context_value("retry_after"), Some("3"));

        let err = ProviderError::Status { code: 502, body: "bad gateway".into() }.into_error();
        assert_eq!(err.context_value("http_status"), Some("502"));
        assert!(err.message().contains("bad gateway"));
    }

    #[test]
    fn test_provider_type_defaults() {
        assert_eq!("OpenAI".parse::<ProviderType>().unwrap(), ProviderType::OpenAI);
        assert!("bard".parse::<ProviderType>().is_err());

        let config = ProviderConfig::anthropic("k").with_base_url("http://localhost:8080/v1/");
        assert_eq!(config.endpoint("messages"), "http://localhost:8080/v1/messages");
        assert_eq!(config.default_model, "claude-sonnet-4-20250514");
        assert_eq!(config.model_list().len(), 3);
        assert_eq!(config.with_models(vec!["x".into()]).model_list(), vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn test_collect_response_assembles_tool_calls() {
        let chunks = vec![
            delta(1, Some("call_b"), Some("execute_shell_command"), "{\"command\":"),
            delta(0, Some("call_a"), Some("save_and_run_code"), "{}"),
            delta(1, None, None, "\"ls\"}"),
            StreamChunk::Done {
                finish_reason: FinishReason::ToolCalls,
                usage: None,
            },
        ];
        let response = StreamReceiver::new(futures_util::stream::iter(chunks))
            .collect_response("gpt-4o")
            .await
            .unwrap();

        assert_eq!(response.content, None);
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        assert_eq!(response.tool_calls.len(), 2);
        assert_eq!(response.tool_calls[0].id, "call_a");
        assert_eq!(response.tool_calls[1].arguments, r#"{"command":"ls"}"#);
    }

    #[tokio::test]
    async fn test_replayed_response_and_stream_errors() {
        let original = CompletionResponse {
            model: "m".into(),
            content: Some("Hello".into()),
            tool_calls: vec![],
            finish_reason: FinishReason::Stop,
            usage: Usage::new(4, 1),
        };
        let replayed = StreamReceiver::from_response(original)
            .collect_response("m")
            .await
            .unwrap();
        assert_eq!(replayed.content.as_deref(), Some("Hello"));
        assert_eq!(replayed.usage.total_tokens, 5);

        let broken = StreamReceiver::new(futures_util::stream::iter(vec![
            StreamChunk::Text("partial".into()),
            StreamChunk::Error("eof".into()),
        ]))
        .collect_response("m")
        .await;
        assert!(matches!(broken, Err(ProviderError::Network(_))));
    }

    #[test]
    fn test_usage_tracker() {
        let mut tracker = UsageTracker::new();
        tracker.record("gpt-4o", &Usage::new(100, 50));
        tracker.record("gpt-4o-mini", &Usage::new(200, 100));

        assert_eq!(tracker.calls, 2);
        assert_eq!(tracker.total_tokens(), 450);
        assert_eq!(tracker.per_model["gpt-4o"].total_tokens, 150);
        assert_eq!(
            tracker.to_string(),
            "2 model calls, 450 tokens (300 prompt, 150 completion)"
        );
    }
}
