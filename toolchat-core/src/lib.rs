//! # toolchat core
//!
//! Building blocks for a tool-using chat agent.
//!
//! ## Core Concepts
//! - **Transcript**: Append-only log of turns (user, assistant text, tool request, tool result)
//! - **Tools**: Executors for shell commands and saved code, each closed over its schema
//! - **Registry**: Name -> executor mapping that validates invocations before running them
//! - **Gateway**: Turn-level view of a model endpoint (final text or a batch of tool requests)
//! - **Provider**: Wire-level LLM clients (OpenAI-compatible, Anthropic)

pub mod config;
pub mod error;
pub mod gateway;
pub mod limits;
pub mod provider;
pub mod storage;
pub mod tools;
pub mod transcript;

pub use config::{LimitsConfig, ProviderSection, StorageConfig, ToolchatConfig, ToolsConfig};
pub use error::{Error, ErrorKind, ErrorStatus, Result};
pub use gateway::{
    default_system_prompt, transcript_messages, ConfiguredProvider, ModelGateway, ModelReply,
    ProviderGateway, ToolRequest,
};
pub use limits::SessionLimits;
pub use provider::{
    AnthropicProvider, ChatMessage, CompletionRequest, CompletionResponse, FinishReason,
    LlmProvider, OpenAIProvider, ProviderConfig, ProviderError, ProviderType, Role,
    StreamChunk, StreamReceiver, ToolCall, ToolDefinition, Usage, UsageTracker,
};
pub use storage::{FileStore, MemoryStore, SnapshotBackend, TranscriptStore};
pub use tools::{
    ParamSpec, ParamType, SaveAndRunCode, ShellExecutor, ToolExecutor, ToolInvocation,
    ToolOutput, ToolRegistry, ToolSpec,
};
pub use transcript::{Transcript, Turn};
