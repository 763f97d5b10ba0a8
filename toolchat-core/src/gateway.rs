//! # Model gateway
//!
//! The turn-level view of a model endpoint: given a transcript and the
//! available tools, the model either answers with final text or asks for a
//! batch of tool calls. Streaming, wire formats and token accounting stay
//! behind this interface.

use crate::error::{Error, Result};
use crate::provider::{
    AnthropicProvider, ChatMessage, CompletionRequest, CompletionResponse, LlmProvider,
    OpenAIProvider, ProviderError, ProviderType, Role, StreamReceiver, ToolCall, UsageTracker,
};
use crate::config::ProviderSection;
use crate::tools::ToolSpec;
use crate::transcript::{Transcript, Turn};
use std::path::Path;
use std::sync::Mutex;

/// One tool call requested by the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequest {
    pub request_id: String,
    pub tool_name: String,
    /// Raw JSON argument text
    pub arguments: String,
}

/// What the model answered for one round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelReply {
    FinalText(String),
    ToolRequests(Vec<ToolRequest>),
}

impl From<CompletionResponse> for ModelReply {
    /// Tool calls win over any text sent alongside them.
    fn from(response: CompletionResponse) -> Self {
        if response.tool_calls.is_empty() {
            ModelReply::FinalText(response.content.unwrap_or_default())
        } else {
            ModelReply::ToolRequests(
                response
                    .tool_calls
                    .into_iter()
                    .map(|tc| ToolRequest {
                        request_id: tc.id,
                        tool_name: tc.name,
                        arguments: tc.arguments,
                    })
                    .collect(),
            )
        }
    }
}

/// Adapter around a remote completion API.
///
/// `complete` fails only for transport-level problems (network, auth, rate
/// limits, unusable replies); the caller treats those as infrastructure
/// errors.
#[allow(async_fn_in_trait)]
pub trait ModelGateway {
    /// Model currently in use
    fn model(&self) -> &str;

    /// Models available for switching, in cycle order
    fn models(&self) -> Vec<String> {
        vec![self.model().to_string()]
    }

    fn set_model(&mut self, model: &str) -> Result<()> {
        Err(Error::new(
            crate::error::ErrorKind::Unsupported,
            format!("cannot switch to model '{}'", model),
        ))
    }

    /// Switch to the next model in the list, wrapping around
    fn cycle_model(&mut self) -> Result<String> {
        let models = self.models();
        if models.is_empty() {
            return Err(Error::config_invalid("no models configured"));
        }
        let next = match models.iter().position(|m| m == self.model()) {
            Some(i) => models[(i + 1) % models.len()].clone(),
            None => models[0].clone(),
        };
        self.set_model(&next)?;
        Ok(next)
    }

    async fn complete(&self, transcript: &Transcript, tools: &[&ToolSpec]) -> Result<ModelReply>;
}

/// Built-in system prompt naming the tools and where code is saved
pub fn default_system_prompt(scripts_dir: &Path) -> String {
    format!(
        "You are a helpful assistant with access to the local machine through tools.\n\
         - execute_shell_command runs a shell command and returns its output.\n\
         - save_and_run_code saves code to a file in {dir} and can execute it.\n\
         Use the tools when they help answer the request, and explain what you did. \
         Several tool calls in one reply run concurrently; their results may arrive \
         in any order and are matched to your calls by id.",
        dir = scripts_dir.display()
    )
}

/// Render a transcript as chat messages.
///
/// Consecutive tool requests become one assistant message carrying all of
/// their calls; tool results become tool-role messages.
pub fn transcript_messages(system_prompt: Option<&str>, transcript: &Transcript) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(transcript.len() + 1);
    if let Some(prompt) = system_prompt {
        messages.push(ChatMessage::system(prompt));
    }

    for turn in transcript {
        match turn {
            Turn::User { text } => messages.push(ChatMessage::user(text.clone())),
            Turn::AssistantText { text } => messages.push(ChatMessage::assistant(text.clone())),
            Turn::AssistantToolRequest {
                request_id,
                tool_name,
                arguments,
            } => {
                let call = ToolCall {
                    id: request_id.clone(),
                    name: tool_name.clone(),
                    arguments: arguments.clone(),
                };
                match messages.last_mut() {
                    Some(last) if last.role == Role::Assistant && !last.tool_calls.is_empty() => {
                        last.tool_calls.push(call)
                    }
                    _ => messages.push(ChatMessage::assistant_tool_calls(vec![call])),
                }
            }
            Turn::ToolResult {
                request_id,
                output,
                succeeded,
                ..
            } => {
                let content = if *succeeded {
                    output.clone()
                } else {
                    format!("[failed] {}", output)
                };
                messages.push(ChatMessage::tool_result(request_id.clone(), content));
            }
        }
    }
    messages
}

// ============================================================================
// Provider-backed gateway
// ============================================================================

/// [`ModelGateway`] over any [`LlmProvider`]
pub struct ProviderGateway<P: LlmProvider> {
    provider: P,
    model: String,
    models: Vec<String>,
    system_prompt: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<usize>,
    usage: Mutex<UsageTracker>,
}

impl<P: LlmProvider> ProviderGateway<P> {
    pub fn new(provider: P) -> Self {
        let model = provider.default_model().to_string();
        let models = provider.models();
        Self {
            provider,
            model,
            models,
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            usage: Mutex::new(UsageTracker::new()),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<usize>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Snapshot of token usage so far
    pub fn usage(&self) -> UsageTracker {
        self.usage.lock().map(|u| u.clone()).unwrap_or_default()
    }

    fn request(&self, transcript: &Transcript, tools: &[&ToolSpec]) -> CompletionRequest {
        let mut request =
            CompletionRequest::new(transcript_messages(self.system_prompt.as_deref(), transcript))
                .with_model(self.model.clone())
                .with_tools(tools.iter().map(|t| t.to_definition()).collect());
        if let Some(t) = self.temperature {
            request = request.with_temperature(t);
        }
        if let Some(n) = self.max_tokens {
            request = request.with_max_tokens(n);
        }
        request
    }
}

impl<P: LlmProvider> ModelGateway for ProviderGateway<P> {
    fn model(&self) -> &str {
        &self.model
    }

    fn models(&self) -> Vec<String> {
        if self.models.is_empty() {
            vec![self.model.clone()]
        } else {
            self.models.clone()
        }
    }

    /// Any non-empty name is accepted; custom endpoints serve arbitrary models.
    fn set_model(&mut self, model: &str) -> Result<()> {
        let model = model.trim();
        if model.is_empty() {
            return Err(Error::invalid_argument("model name is empty"));
        }
        tracing::info!(from = %self.model, to = model, "switching model");
        self.model = model.to_string();
        Ok(())
    }

    async fn complete(&self, transcript: &Transcript, tools: &[&ToolSpec]) -> Result<ModelReply> {
        let request = self.request(transcript, tools);
        let response = self
            .provider
            .complete(request)
            .await
            .map_err(|e| e.into_error().with_context("model", self.model.clone()))?;

        if let Ok(mut usage) = self.usage.lock() {
            usage.record(&self.model, &response.usage);
        }
        tracing::debug!(
            model = %self.model,
            finish = ?response.finish_reason,
            tool_calls = response.tool_calls.len(),
            "model replied"
        );
        Ok(ModelReply::from(response))
    }
}

// ============================================================================
// Runtime provider selection
// ============================================================================

/// Provider chosen by configuration at runtime
pub enum ConfiguredProvider {
    OpenAI(OpenAIProvider),
    Anthropic(AnthropicProvider),
}

impl ConfiguredProvider {
    pub fn from_section(section: &ProviderSection) -> Result<Self> {
        let config = section.to_provider_config();
        if config.api_key.is_empty() {
            tracing::warn!(var = section.api_key_env(), "API key environment variable is not set");
        }
        Ok(match section.kind {
            ProviderType::OpenAI => ConfiguredProvider::OpenAI(OpenAIProvider::new(config)?),
            ProviderType::Anthropic => {
                ConfiguredProvider::Anthropic(AnthropicProvider::new(config)?)
            }
        })
    }
}

impl LlmProvider for ConfiguredProvider {
    fn name(&self) -> &str {
        match self {
            ConfiguredProvider::OpenAI(p) => p.name(),
            ConfiguredProvider::Anthropic(p) => p.name(),
        }
    }

    fn models(&self) -> Vec<String> {
        match self {
            ConfiguredProvider::OpenAI(p) => p.models(),
            ConfiguredProvider::Anthropic(p) => p.models(),
        }
    }

    fn default_model(&self) -> &str {
        match self {
            ConfiguredProvider::OpenAI(p) => p.default_model(),
            ConfiguredProvider::Anthropic(p) => p.default_model(),
        }
    }

    async fn complete(&self, request: CompletionRequest) -> std::result::Result<CompletionResponse, ProviderError> {
        match self {
            ConfiguredProvider::OpenAI(p) => p.complete(request).await,
            ConfiguredProvider::Anthropic(p) => p.complete(request).await,
        }
    }

    async fn stream(&self, request: CompletionRequest) -> std::result::Result<StreamReceiver, ProviderError> {
        match self {
            ConfiguredProvider::OpenAI(p) => p.stream(request).await,
            ConfiguredProvider::Anthropic(p) => p.stream(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{FinishReason, Usage};
    use crate::tools::ParamType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn transcript() -> Transcript {
        let mut t = Transcript::new();
        t.append(Turn::user("what is here?"));
        t.commit_round(vec![
            Turn::tool_request("a", "execute_shell_command", r#"{"command":"ls"}"#),
            Turn::tool_request("b", "execute_shell_command", r#"{"command":"pwd"}"#),
            Turn::tool_result("b", "execute_shell_command", "/root", true),
            Turn::tool_result("a", "execute_shell_command", "boom", false),
        ]);
        t
    }

    #[test]
    fn test_requests_grouped_into_one_message() {
        let messages = transcript_messages(Some("sys"), &transcript());
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[2].tool_calls.len(), 2);
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("b"));
        assert_eq!(messages[4].content.as_deref(), Some("[failed] boom"));
    }

    #[test]
    fn test_reply_prefers_tool_calls() {
        let response = CompletionResponse {
            model: String::new(),
            content: Some("let me check".into()),
            tool_calls: vec![ToolCall {
                id: "c1".into(),
                name: "execute_shell_command".into(),
                arguments: "{}".into(),
            }],
            finish_reason: FinishReason::ToolCalls,
            usage: Usage::default(),
        };
        match ModelReply::from(response) {
            ModelReply::ToolRequests(reqs) => assert_eq!(reqs[0].request_id, "c1"),
            other => panic!("unexpected {:?}", other),
        }
    }

    struct EchoProvider {
        calls: AtomicUsize,
    }

    impl LlmProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        fn models(&self) -> Vec<String> {
            vec!["m1".into(), "m2".into(), "m3".into()]
        }

        fn default_model(&self) -> &str {
            "m1"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> std::result::Result<CompletionResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.tools.is_empty() {
                return Err(ProviderError::Status {
                    code: 503,
                    body: "overloaded".into(),
                });
            }
            Ok(CompletionResponse {
                model: request.model.unwrap_or_default(),
                content: Some(format!("{} messages", request.messages.len())),
                tool_calls: vec![],
                finish_reason: FinishReason::Stop,
                usage: Usage::new(3, 2),
            })
        }
    }

    fn gateway() -> ProviderGateway<EchoProvider> {
        ProviderGateway::new(EchoProvider {
            calls: AtomicUsize::new(0),
        })
        .with_system_prompt(default_system_prompt(Path::new("./scripts")))
    }

    #[tokio::test]
    async fn test_complete_and_usage() {
        let gw = gateway();
        let spec = ToolSpec::new("t", "d").required("x", ParamType::String, "x");
        let reply = gw.complete(&transcript(), &[&spec]).await.unwrap();
        assert_eq!(reply, ModelReply::FinalText("5 messages".into()));
        assert_eq!(gw.usage().total_tokens(), 5);
    }

    #[tokio::test]
    async fn test_transport_error_kind() {
        let gw = gateway();
        let err = gw.complete(&transcript(), &[]).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ProviderUnavailable);
        assert_eq!(gw.provider().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_model_switching() {
        let mut gw = gateway();
        assert_eq!(gw.model(), "m1");
        assert_eq!(gw.cycle_model().unwrap(), "m2");
        assert_eq!(gw.cycle_model().unwrap(), "m3");
        assert_eq!(gw.cycle_model().unwrap(), "m1");
        gw.set_model("custom").unwrap();
        assert_eq!(gw.cycle_model().unwrap(), "m1");
        assert!(gw.set_model("  ").is_err());
    }

    #[test]
    fn test_system_prompt_mentions_tools() {
        let prompt = default_system_prompt(Path::new("/tmp/scripts"));
        assert!(prompt.contains("execute_shell_command"));
        assert!(prompt.contains("save_and_run_code"));
        assert!(prompt.contains("/tmp/scripts"));
    }
}
