//! # Tools
//!
//! The contract a tool must satisfy to be invoked by the orchestration loop.
//!
//! Every executor is closed over its own [`ToolSpec`] and always returns a
//! [`ToolOutput`]: failures (bad arguments, non-zero exit, timeout,
//! unsupported language) are data for the model, never a panic or an `Err`
//! bubbling out of the loop.

pub mod code;
pub mod registry;
pub mod shell;

pub use code::SaveAndRunCode;
pub use registry::ToolRegistry;
pub use shell::ShellExecutor;

use crate::error::{Error, Result};
use crate::provider::ToolDefinition;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

/// Appended when tool output had to be cut
pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

// ============================================================================
// Schema
// ============================================================================

/// JSON type of a tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Boolean,
    Integer,
    Number,
    Object,
    Array,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Boolean => "boolean",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Object => value.is_object(),
            ParamType::Array => value.is_array(),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One named parameter of a tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamType,
    pub required: bool,
    pub description: String,
}

/// Declared name, description and parameter contract of a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
        }
    }

    /// Add a required parameter
    pub fn required(mut self, name: &str, kind: ParamType, description: &str) -> Self {
        self.params.push(ParamSpec {
            name: name.to_string(),
            kind,
            required: true,
            description: description.to_string(),
        });
        self
    }

    /// Add an optional parameter
    pub fn optional(mut self, name: &str, kind: ParamType, description: &str) -> Self {
        self.params.push(ParamSpec {
            name: name.to_string(),
            kind,
            required: false,
            description: description.to_string(),
        });
        self
    }

    /// JSON-schema rendering handed to the model
    pub fn to_definition(&self) -> ToolDefinition {
        let mut properties = Map::new();
        for p in &self.params {
            properties.insert(
                p.name.clone(),
                serde_json::json!({
                    "type": p.kind.as_str(),
                    "description": p.description,
                }),
            );
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }

    /// Check an argument map against the declared parameters.
    ///
    /// Missing required arguments and wrongly typed arguments are rejected.
    /// A `null` counts as absent. Undeclared arguments are ignored.
    pub fn check(&self, arguments: &Map<String, Value>) -> Result<()> {
        for p in &self.params {
            match arguments.get(&p.name) {
                None | Some(Value::Null) if p.required => {
                    return Err(crate::error::missing_argument(&self.name, &p.name));
                }
                None | Some(Value::Null) => {}
                Some(value) if !p.kind.matches(value) => {
                    return Err(Error::invalid_argument(format!(
                        "argument '{}' must be {}, got {}",
                        p.name,
                        p.kind.as_str(),
                        json_type_name(value)
                    ))
                    .with_context("tool", self.name.clone())
                    .with_context("argument", p.name.clone()));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

// ============================================================================
// Invocation & output
// ============================================================================

/// A tool call produced by the model, arguments already parsed to a map.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub request_id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl ToolInvocation {
    pub fn new(
        request_id: impl Into<String>,
        name: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Parse the raw argument string the model sent.
    ///
    /// An empty string is treated as `{}`; anything that is not a JSON
    /// object is an invalid argument.
    pub fn parse(request_id: &str, name: &str, raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::new(request_id, name, Map::new()));
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(Self::new(request_id, name, map)),
            Ok(other) => Err(Error::invalid_argument(format!(
                "arguments must be a JSON object, got {}",
                json_type_name(&other)
            ))
            .with_context("tool", name.to_string())),
            Err(e) => Err(Error::invalid_argument(format!("arguments are not valid JSON: {}", e))
                .with_context("tool", name.to_string())),
        }
    }

    pub fn str_arg(&self, name: &str) -> Option<&str> {
        self.arguments.get(name).and_then(|v| v.as_str())
    }

    pub fn bool_arg(&self, name: &str) -> Option<bool> {
        self.arguments.get(name).and_then(|v| v.as_bool())
    }
}

/// What a tool hands back to the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub output: String,
    pub succeeded: bool,
}

impl ToolOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            succeeded: true,
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            succeeded: false,
        }
    }

    /// Render an error as a failed result the model can read
    pub fn from_error(err: &Error) -> Self {
        Self::failed(format!("[{}] {}", err.kind(), err.message()))
    }

    /// Cap the output at `max_bytes`, cutting on a char boundary.
    pub fn truncated(mut self, max_bytes: usize) -> Self {
        if self.output.len() > max_bytes {
            let mut cut = max_bytes;
            while cut > 0 && !self.output.is_char_boundary(cut) {
                cut -= 1;
            }
            self.output.truncate(cut);
            self.output.push_str(TRUNCATION_MARKER);
        }
        self
    }
}

// ============================================================================
// Executor trait
// ============================================================================

/// A single invocable capability.
///
/// `execute` receives an invocation that already passed [`ToolSpec::check`]
/// and must return within roughly `timeout`.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    async fn execute(&self, invocation: &ToolInvocation, timeout: Duration) -> ToolOutput;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec() -> ToolSpec {
        ToolSpec::new("save_and_run_code", "Save code")
            .required("code", ParamType::String, "The code")
            .optional("execute", ParamType::Boolean, "Run it")
    }

    #[test]
    fn test_definition_schema() {
        let def = spec().to_definition();
        assert_eq!(def.name, "save_and_run_code");
        assert_eq!(def.parameters["properties"]["code"]["type"], "string");
        assert_eq!(def.parameters["required"], json!(["code"]));
    }

    #[test]
    fn test_check_arguments() {
        let ok = json!({"code": "print(1)", "execute": true});
        assert!(spec().check(ok.as_object().unwrap()).is_ok());

        let missing = json!({"execute": true});
        let err = spec().check(missing.as_object().unwrap()).unwrap_err();
        assert!(err.message().contains("missing required argument 'code'"));

        let mistyped = json!({"code": "x", "execute": "yes"});
        let err = spec().check(mistyped.as_object().unwrap()).unwrap_err();
        assert!(err.message().contains("must be boolean, got string"));

        let null_optional = json!({"code": "x", "execute": null});
        assert!(spec().check(null_optional.as_object().unwrap()).is_ok());
    }

    #[test]
    fn test_parse_invocation() {
        let inv = ToolInvocation::parse("c1", "t", r#"{"command": "ls"}"#).unwrap();
        assert_eq!(inv.str_arg("command"), Some("ls"));

        let inv = ToolInvocation::parse("c1", "t", "  ").unwrap();
        assert!(inv.arguments.is_empty());

        assert!(ToolInvocation::parse("c1", "t", "[1,2]").is_err());
        assert!(ToolInvocation::parse("c1", "t", "{oops").is_err());
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        let out = ToolOutput::ok("héllo wörld").truncated(2);
        assert!(out.output.starts_with('h'));
        assert!(out.output.ends_with(TRUNCATION_MARKER));

        let out = ToolOutput::ok("short").truncated(100);
        assert_eq!(out.output, "short");
    }
}
