//! # toolchat-error
//!
//! Unified error handling for toolchat.
//!
//! ## Design Philosophy
//!
//! - **ErrorKind**: Know what error occurred (e.g., ToolNotFound, NetworkFailed)
//! - **ErrorStatus**: Decide how to handle it (Permanent, Temporary, Persistent)
//! - **Error Context**: Assist in locating the cause with rich context
//! - **Error Source**: Wrap underlying errors without leaking raw types
//!
//! ## Usage
//!
//! ```rust
//! use toolchat_error::{Error, ErrorKind};
//!
//! fn example() -> Result<(), Error> {
//!     Err(Error::new(ErrorKind::ToolNotFound, "tool 'rm_rf' is not registered")
//!         .with_operation("registry::validate")
//!         .with_context("tool", "rm_rf")
//!         .with_context("request_id", "call_1"))
//! }
//! ```
//!
//! ## Principles
//!
//! - All functions return `Result<T, toolchat_error::Error>`
//! - External errors are wrapped with `set_source(err)`
//! - Same error handled once, subsequent ops only append context
//! - Don't abuse `From<OtherError>` to prevent raw error leakage

mod error;
mod kind;
mod status;

pub use error::Error;
pub use kind::{Category, ErrorKind};
pub use status::ErrorStatus;

/// Result type alias using toolchat Error
pub type Result<T> = std::result::Result<T, Error>;
