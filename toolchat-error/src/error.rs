//! The [`Error`] type shared by every toolchat crate

use crate::{ErrorKind, ErrorStatus};
use std::fmt;

/// An error raised by the agent, its tools or its storage.
///
/// Carries what went wrong (`kind`, `message`), whether trying again makes
/// sense (`status`), where it happened (`operation` plus any operations it
/// passed through) and free-form key/value breadcrumbs. A wrapped foreign
/// error is kept as the `source`.
///
/// ```rust
/// use toolchat_error::{Error, ErrorKind};
///
/// let err = Error::new(ErrorKind::NetworkFailed, "connection reset by peer")
///     .with_operation("gateway::complete")
///     .with_context("model", "gpt-4o")
///     .with_context("round", "3");
///
/// assert_eq!(err.kind(), ErrorKind::NetworkFailed);
/// assert!(err.is_retryable());
/// assert_eq!(
///     err.to_string(),
///     "NetworkFailed at gateway::complete: connection reset by peer [model=gpt-4o, round=3] (temporary)"
/// );
/// ```
pub struct Error {
    kind: ErrorKind,
    message: String,
    status: ErrorStatus,
    operation: &'static str,
    context: Vec<(&'static str, String)>,
    source: Option<anyhow::Error>,
}

impl Error {
    /// Status defaults to `Temporary` for retryable kinds, else `Permanent`.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: ErrorStatus::default_for(kind),
            operation: "",
            context: Vec::new(),
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> ErrorStatus {
        self.status
    }

    /// Innermost-last operation name; empty when none was recorded
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn context(&self) -> &[(&'static str, String)] {
        &self.context
    }

    /// First context value recorded under `key`
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn source_ref(&self) -> Option<&anyhow::Error> {
        self.source.as_ref()
    }

    pub fn is_retryable(&self) -> bool {
        self.status.is_retryable()
    }

    pub fn with_status(mut self, status: ErrorStatus) -> Self {
        self.status = status;
        self
    }

    pub fn temporary(self) -> Self {
        self.with_status(ErrorStatus::Temporary)
    }

    pub fn permanent(self) -> Self {
        self.with_status(ErrorStatus::Permanent)
    }

    /// Give up on retrying: `Temporary` becomes `Persistent`.
    pub fn persist(mut self) -> Self {
        self.status = self.status.persist();
        self
    }

    /// Record the operation the error surfaced from. An earlier operation is
    /// kept in the context under `called`.
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        if !self.operation.is_empty() {
            let inner = std::mem::replace(&mut self.operation, operation);
            self.context.push(("called", inner.to_string()));
        } else {
            self.operation = operation;
        }
        self
    }

    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Attach the underlying cause. Set it once, where the foreign error is
    /// first converted.
    pub fn set_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "source error already set");
        self.source = Some(source.into());
        self
    }
}

/// Single line: `Kind at op: message [k=v, ...] (status)`
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.as_str())?;
        if !self.operation.is_empty() {
            write!(f, " at {}", self.operation)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if !self.context.is_empty() {
            let pairs: Vec<String> = self
                .context
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, " [{}]", pairs.join(", "))?;
        }
        write!(f, " ({})", self.status)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            let mut s = f.debug_struct("Error");
            s.field("kind", &self.kind)
                .field("status", &self.status)
                .field("operation", &self.operation)
                .field("message", &self.message)
                .field("context", &self.context);
            if let Some(source) = &self.source {
                s.field("source", source);
            }
            return s.finish();
        }

        writeln!(f, "{}", self)?;
        if let Some(source) = &self.source {
            for (depth, cause) in source.chain().enumerate() {
                writeln!(f, "  caused by ({}): {}", depth, cause)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::FileNotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            _ => ErrorKind::IoFailed,
        };
        Error::new(kind, err.to_string())
            .with_operation("io")
            .set_source(err)
    }
}

macro_rules! kind_constructors {
    ($($(#[$doc:meta])* $name:ident => $kind:ident;)*) => {
        impl Error {
            $(
                $(#[$doc])*
                pub fn $name(message: impl Into<String>) -> Self {
                    Self::new(ErrorKind::$kind, message)
                }
            )*
        }
    };
}

kind_constructors! {
    unexpected => Unexpected;
    /// The operator interrupted the running exchange
    cancelled => Cancelled;
    config_invalid => ConfigInvalid;
    /// Bad tool arguments, or a command that cannot apply in the current state
    invalid_argument => InvalidArgument;
    inference_failed => InferenceFailed;
    /// A persisted transcript that cannot be parsed or violates correlation
    corrupt_snapshot => CorruptSnapshot;
    storage_failed => StorageFailed;
}

impl Error {
    /// The model named a tool nobody registered
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(ErrorKind::ToolNotFound, format!("unknown tool '{}'", name))
            .with_context("tool", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_follows_kind() {
        let err = Error::new(ErrorKind::ToolNotFound, "tool 'x' not found");
        assert_eq!(err.message(), "tool 'x' not found");
        assert_eq!(err.status(), ErrorStatus::Permanent);
        assert!(!err.is_retryable());

        let err = Error::new(ErrorKind::RateLimited, "slow down");
        assert_eq!(err.status(), ErrorStatus::Temporary);
        assert!(!err.permanent().is_retryable());
    }

    #[test]
    fn test_context_lookup() {
        let err = Error::inference_failed("empty reply")
            .with_context("model", "gpt-4o")
            .with_context("round", "2");

        assert_eq!(err.context().len(), 2);
        assert_eq!(err.context_value("round"), Some("2"));
        assert_eq!(err.context_value("missing"), None);
    }

    #[test]
    fn test_operation_chain_is_kept() {
        let err = Error::storage_failed("write failed")
            .with_operation("storage::write")
            .with_operation("session::autosave");

        assert_eq!(err.operation(), "session::autosave");
        assert_eq!(err.context_value("called"), Some("storage::write"));
    }

    #[test]
    fn test_persist_after_retries() {
        let err = Error::new(ErrorKind::NetworkFailed, "connection refused");
        assert!(err.is_retryable());

        let err = err.persist();
        assert!(!err.is_retryable());
        assert_eq!(err.status(), ErrorStatus::Persistent);
    }

    #[test]
    fn test_display_layout() {
        let err = Error::cancelled("exchange interrupted by operator")
            .with_operation("agent::advance")
            .with_context("round", "0");
        assert_eq!(
            err.to_string(),
            "Cancelled at agent::advance: exchange interrupted by operator [round=0] (permanent)"
        );

        assert_eq!(Error::unexpected("").to_string(), "Unexpected (permanent)");
    }

    #[test]
    fn test_tool_not_found() {
        let err = Error::tool_not_found("format_disk");
        assert_eq!(err.kind(), ErrorKind::ToolNotFound);
        assert_eq!(err.message(), "unknown tool 'format_disk'");
        assert_eq!(err.context_value("tool"), Some("format_disk"));
    }

    #[test]
    fn test_source_is_exposed() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = Error::corrupt_snapshot("conversation.json is not valid JSON").set_source(parse_err);

        assert!(err.source_ref().is_some());
        assert!(std::error::Error::source(&err).is_some());
        assert!(format!("{:?}", err).contains("caused by (0)"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
        assert_eq!(err.operation(), "io");

        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert_eq!(Error::from(io_err).kind(), ErrorKind::IoFailed);
    }
}
