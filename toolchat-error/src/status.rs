//! Error status - how callers should react to an error

use crate::ErrorKind;
use std::fmt;

/// Whether an error is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorStatus {
    /// Retrying will not help
    Permanent,
    /// Retrying may succeed
    Temporary,
    /// Was temporary, but retries have been exhausted
    Persistent,
}

impl ErrorStatus {
    /// Starting status for a fresh error of `kind`
    pub fn default_for(kind: ErrorKind) -> Self {
        if kind.is_retryable() {
            ErrorStatus::Temporary
        } else {
            ErrorStatus::Permanent
        }
    }

    /// Check if the error may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorStatus::Temporary)
    }

    /// Transition after failed retries: Temporary becomes Persistent.
    pub fn persist(self) -> Self {
        match self {
            ErrorStatus::Temporary => ErrorStatus::Persistent,
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStatus::Permanent => "permanent",
            ErrorStatus::Temporary => "temporary",
            ErrorStatus::Persistent => "persistent",
        }
    }
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persist_only_affects_temporary() {
        assert_eq!(ErrorStatus::Temporary.persist(), ErrorStatus::Persistent);
        assert_eq!(ErrorStatus::Permanent.persist(), ErrorStatus::Permanent);
        assert!(!ErrorStatus::Persistent.is_retryable());
    }

    #[test]
    fn test_default_for_kind() {
        assert_eq!(ErrorStatus::default_for(ErrorKind::RateLimited), ErrorStatus::Temporary);
        assert_eq!(ErrorStatus::default_for(ErrorKind::ToolNotFound), ErrorStatus::Permanent);
    }
}
