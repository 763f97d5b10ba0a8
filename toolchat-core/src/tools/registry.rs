//! Tool registry: name -> executor, validated before dispatch.
//!
//! A misbehaving model must stay recoverable inside the conversation, so
//! `dispatch` never fails: unknown tools, unparsable or mistyped arguments
//! all come back as a failed [`ToolOutput`]. The per-tool timeout is
//! enforced here as well, whether or not the executor honours it.

use super::code::SaveAndRunCode;
use super::shell::{self, ShellExecutor};
use super::{ToolExecutor, ToolInvocation, ToolOutput, ToolSpec};
use crate::config::ToolsConfig;
use crate::error::{Error, Result};
use crate::provider::ToolDefinition;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn ToolExecutor>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the shell and save-and-run-code tools
    pub fn with_defaults(config: &ToolsConfig) -> Self {
        let shell = ShellExecutor::new().with_max_output_bytes(config.max_output_bytes);
        let code = SaveAndRunCode::new(&config.scripts_dir, shell.clone());

        let mut registry = Self::new();
        registry.tools.insert(shell.spec().name.clone(), Box::new(shell));
        registry.tools.insert(code.spec().name.clone(), Box::new(code));
        registry
    }

    /// Register a tool. Names are unique; specs never change afterwards.
    pub fn register(&mut self, executor: impl ToolExecutor + 'static) -> Result<()> {
        let name = executor.spec().name.clone();
        if self.tools.contains_key(&name) {
            return Err(Error::invalid_argument(format!("tool '{}' already registered", name))
                .with_operation("registry::register"));
        }
        self.tools.insert(name, Box::new(executor));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&dyn ToolExecutor> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn specs(&self) -> Vec<&ToolSpec> {
        self.tools.values().map(|t| t.spec()).collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.spec().to_definition()).collect()
    }

    /// Check that the tool exists and the arguments satisfy its schema
    pub fn validate(&self, invocation: &ToolInvocation) -> Result<()> {
        let tool = self
            .get(&invocation.name)
            .ok_or_else(|| Error::tool_not_found(&invocation.name))?;
        tool.spec().check(&invocation.arguments)
    }

    /// Parse, validate and run one request. Always yields an output.
    pub async fn dispatch(
        &self,
        request_id: &str,
        name: &str,
        raw_arguments: &str,
        timeout: Duration,
    ) -> ToolOutput {
        let invocation = match ToolInvocation::parse(request_id, name, raw_arguments)
            .and_then(|inv| self.validate(&inv).map(|_| inv))
        {
            Ok(inv) => inv,
            Err(e) => {
                tracing::info!(request_id, tool = name, error = %e, "rejected tool invocation");
                return ToolOutput::from_error(&e);
            }
        };

        let Some(tool) = self.get(name) else {
            return ToolOutput::from_error(&Error::tool_not_found(name));
        };

        let started = Instant::now();
        let output = match tokio::time::timeout(timeout, tool.execute(&invocation, timeout)).await {
            Ok(output) => output,
            Err(_) => {
                tracing::info!(request_id, tool = name, "tool ignored its timeout; abandoned");
                shell::timed_out(timeout)
            }
        };
        tracing::info!(
            request_id,
            tool = name,
            succeeded = output.succeeded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tool finished"
        );
        output
    }
}
