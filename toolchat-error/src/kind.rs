//! What went wrong, and which side of the conversation it belongs to

use std::fmt;

/// Where a failure originates, which decides how it propagates.
///
/// Tool failures are data for the model; transport and persistence failures
/// go to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    General,
    /// The model endpoint
    Transport,
    /// A tool the model asked for
    Tool,
    /// Transcript files and the filesystem under them
    Persistence,
}

macro_rules! error_kinds {
    ($($(#[$doc:meta])* $kind:ident => $category:ident,)*) => {
        /// The kind of error that occurred.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        pub enum ErrorKind {
            $($(#[$doc])* $kind,)*
        }

        impl ErrorKind {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(ErrorKind::$kind => stringify!($kind),)*
                }
            }

            pub fn category(&self) -> Category {
                match self {
                    $(ErrorKind::$kind => Category::$category,)*
                }
            }
        }
    };
}

error_kinds! {
    /// Catch-all for states that should not happen
    Unexpected => General,
    Unsupported => General,
    ConfigInvalid => General,
    /// The operator interrupted the exchange
    Cancelled => General,

    NetworkFailed => Transport,
    /// Server-side failure at the provider
    ProviderUnavailable => Transport,
    RateLimited => Transport,
    AuthenticationFailed => Transport,
    /// The provider answered with something unusable
    InferenceFailed => Transport,

    /// The model named an unregistered tool
    ToolNotFound => Tool,
    /// Arguments missing, mistyped or unparsable
    InvalidArgument => Tool,
    ToolFailed => Tool,
    ToolTimeout => Tool,
    /// No runner is known for the language
    UnsupportedLanguage => Tool,

    StorageFailed => Persistence,
    SerializationFailed => Persistence,
    /// A snapshot that cannot be restored
    CorruptSnapshot => Persistence,
    FileNotFound => Persistence,
    PermissionDenied => Persistence,
    IoFailed => Persistence,

    ParseFailed => General,
}

impl ErrorKind {
    /// Whether a fresh attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkFailed
                | ErrorKind::ProviderUnavailable
                | ErrorKind::RateLimited
                | ErrorKind::InferenceFailed
                | ErrorKind::ToolTimeout
        )
    }

    /// Failure of the model endpoint; aborts the current round only.
    pub fn is_transport(&self) -> bool {
        self.category() == Category::Transport
    }

    pub fn is_tool(&self) -> bool {
        self.category() == Category::Tool
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(ErrorKind::ToolNotFound.to_string(), "ToolNotFound");
        assert_eq!(ErrorKind::CorruptSnapshot.as_str(), "CorruptSnapshot");
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::NetworkFailed.is_retryable());
        assert!(ErrorKind::ToolTimeout.is_retryable());
        assert!(!ErrorKind::AuthenticationFailed.is_retryable());
        assert!(!ErrorKind::CorruptSnapshot.is_retryable());
    }

    #[test]
    fn test_categories() {
        assert!(ErrorKind::AuthenticationFailed.is_transport());
        assert!(!ErrorKind::AuthenticationFailed.is_tool());
        assert!(ErrorKind::UnsupportedLanguage.is_tool());
        assert_eq!(ErrorKind::StorageFailed.category(), Category::Persistence);
        assert_eq!(ErrorKind::Cancelled.category(), Category::General);
    }
}
