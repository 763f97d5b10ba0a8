//! Per-session safety bounds.

use std::time::Duration;

/// Default cap on model/tool round-trips per user turn
pub const DEFAULT_MAX_TOOL_CALL_ROUNDS: usize = 128;

/// Default time budget for a single tool invocation
pub const DEFAULT_PER_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Bounds applied by the orchestration loop. Fixed for the life of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub max_tool_call_rounds: usize,
    pub per_tool_timeout: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_tool_call_rounds: DEFAULT_MAX_TOOL_CALL_ROUNDS,
            per_tool_timeout: DEFAULT_PER_TOOL_TIMEOUT,
        }
    }
}

impl SessionLimits {
    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_call_rounds = rounds;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.per_tool_timeout = timeout;
        self
    }
}
