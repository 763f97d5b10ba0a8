//! # Configuration
//!
//! TOML configuration with every section optional.
//!
//! Lookup order: an explicit path, then `./toolchat.toml`, then
//! `<config dir>/toolchat/config.toml`, else built-in defaults. A file that
//! exists but does not parse is an error; a missing file is not.
//!
//! ```toml
//! [provider]
//! kind = "openai"
//! models = ["gpt-4o", "gpt-4o-mini"]
//!
//! [limits]
//! max_tool_call_rounds = 32
//! per_tool_timeout_secs = 60
//! ```

use crate::error::{Error, Result};
use crate::limits::{SessionLimits, DEFAULT_MAX_TOOL_CALL_ROUNDS};
use crate::provider::{ProviderConfig, ProviderType};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "toolchat.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchatConfig {
    pub provider: ProviderSection,
    pub limits: LimitsConfig,
    pub storage: StorageConfig,
    pub tools: ToolsConfig,
    /// Replaces the built-in system prompt when set
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    pub kind: ProviderType,
    pub base_url: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
    /// Cycle order for model switching
    pub models: Vec<String>,
    pub default_model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub timeout_secs: u64,
    pub stream: bool,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            kind: ProviderType::OpenAI,
            base_url: None,
            api_key_env: None,
            models: Vec::new(),
            default_model: None,
            temperature: None,
            max_tokens: None,
            timeout_secs: 120,
            stream: false,
        }
    }
}

impl ProviderSection {
    pub fn api_key_env(&self) -> &str {
        match (&self.api_key_env, self.kind) {
            (Some(var), _) => var,
            (None, ProviderType::OpenAI) => "OPENAI_API_KEY",
            (None, ProviderType::Anthropic) => "ANTHROPIC_API_KEY",
        }
    }

    /// Build the wire-level provider config, reading the key from the environment.
    pub fn to_provider_config(&self) -> ProviderConfig {
        let api_key = std::env::var(self.api_key_env()).unwrap_or_default();
        let mut config = ProviderConfig::new(self.kind, api_key);
        if let Some(url) = &self.base_url {
            config = config.with_base_url(url.clone());
        }
        if let Some(model) = self.default_model.as_ref().or(self.models.first()) {
            config = config.with_model(model.clone());
        }
        config
            .with_models(self.models.clone())
            .with_timeout(self.timeout_secs)
            .with_streaming(self.stream)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_tool_call_rounds: usize,
    pub per_tool_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_tool_call_rounds: DEFAULT_MAX_TOOL_CALL_ROUNDS,
            per_tool_timeout_secs: 30,
        }
    }
}

impl LimitsConfig {
    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits::default()
            .with_max_rounds(self.max_tool_call_rounds)
            .with_tool_timeout(Duration::from_secs(self.per_tool_timeout_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub dir: PathBuf,
    /// File name prefix of saved sessions; the history file is `<prefix>_history.json`
    pub prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            prefix: "conversation".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub scripts_dir: PathBuf,
    pub max_output_bytes: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            scripts_dir: PathBuf::from("./scripts"),
            max_output_bytes: 64 * 1024,
        }
    }
}

impl ToolchatConfig {
    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            Error::config_invalid(format!("invalid configuration: {}", e.message()))
                .with_operation("config::from_toml")
                .set_source(e)
        })
    }

    /// Load a specific file. Missing or malformed files are errors.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config_invalid(format!("cannot read config file: {}", e))
                .with_operation("config::load_from_file")
                .with_context("path", path.display().to_string())
        })?;
        Self::from_toml(&content).map_err(|e| e.with_context("path", path.display().to_string()))
    }

    /// Resolve the configuration by the documented lookup order
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }
        for candidate in Self::candidates() {
            if candidate.is_file() {
                tracing::debug!(path = %candidate.display(), "loading config");
                return Self::load_from_file(&candidate);
            }
        }
        Ok(Self::default())
    }

    fn candidates() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("toolchat").join("config.toml"));
        }
        paths
    }
}
