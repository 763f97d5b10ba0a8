//! Core error helpers
//!
//! Re-exports toolchat-error and provides constructors for the storage
//! and tool layers.

pub use toolchat_error::{Error, ErrorKind, ErrorStatus, Result};

/// Create a SerializationFailed error
pub fn serialization_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::SerializationFailed, message)
}

/// Create a StorageFailed error with the offending path attached
pub fn storage_failed(path: impl Into<String>, reason: impl Into<String>) -> Error {
    Error::storage_failed(reason).with_context("path", path)
}

/// Create an UnsupportedLanguage error
pub fn unsupported_language(language: impl Into<String>) -> Error {
    let language = language.into();
    Error::new(
        ErrorKind::UnsupportedLanguage,
        format!("Execution not supported for language: {}", language),
    )
    .with_context("language", language)
}

/// Create a missing-argument error
pub fn missing_argument(tool: &str, name: &str) -> Error {
    Error::invalid_argument(format!("missing required argument '{}'", name))
        .with_context("tool", tool.to_string())
        .with_context("argument", name.to_string())
}
