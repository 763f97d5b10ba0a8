//! # Transcript
//!
//! The ordered, append-only log of one conversation.
//!
//! A transcript only grows. The two exceptions are operator commands that
//! replace the whole sequence at once (`clear` and `load`). Every
//! `ToolResult` turn correlates with exactly one earlier `AssistantToolRequest`
//! by `request_id`; results of one batch may appear in any order.
//!
//! ## Snapshot format
//!
//! ```json
//! { "version": 1, "saved_at": "2024-05-01T10:00:00+00:00", "turns": [ ... ] }
//! ```

use crate::error::{self, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const SNAPSHOT_VERSION: u32 = 1;

/// One entry in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Turn {
    User {
        text: String,
    },
    AssistantText {
        text: String,
    },
    AssistantToolRequest {
        request_id: String,
        tool_name: String,
        /// Raw JSON arguments exactly as the model produced them
        arguments: String,
    },
    ToolResult {
        request_id: String,
        tool_name: String,
        output: String,
        succeeded: bool,
    },
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Turn::User { text: text.into() }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Turn::AssistantText { text: text.into() }
    }

    pub fn tool_request(
        request_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Turn::AssistantToolRequest {
            request_id: request_id.into(),
            tool_name: tool_name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn tool_result(
        request_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: impl Into<String>,
        succeeded: bool,
    ) -> Self {
        Turn::ToolResult {
            request_id: request_id.into(),
            tool_name: tool_name.into(),
            output: output.into(),
            succeeded,
        }
    }

    /// Short label used in logs and listings
    pub fn kind(&self) -> &'static str {
        match self {
            Turn::User { .. } => "user",
            Turn::AssistantText { .. } => "assistant",
            Turn::AssistantToolRequest { .. } => "tool_request",
            Turn::ToolResult { .. } => "tool_result",
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            Turn::AssistantToolRequest { request_id, .. } | Turn::ToolResult { request_id, .. } => {
                Some(request_id)
            }
            _ => None,
        }
    }
}

/// Ordered sequence of turns owned by a single orchestration loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    turns: Vec<Turn>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    saved_at: String,
    turns: &'a [Turn],
}

#[derive(Deserialize)]
struct SnapshotOwned {
    version: u32,
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Turn> {
        self.turns.iter()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Append a single turn
    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Append a fully joined round (requests followed by their results).
    pub fn commit_round(&mut self, turns: Vec<Turn>) {
        self.turns.extend(turns);
    }

    /// Drop every turn (operator "clear")
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Atomically replace the whole sequence (operator "load")
    pub fn replace(&mut self, other: Transcript) {
        self.turns = other.turns;
    }

    /// Whether a request id is already taken by some tool request
    pub fn has_request_id(&self, request_id: &str) -> bool {
        self.turns.iter().any(|t| {
            matches!(t, Turn::AssistantToolRequest { request_id: id, .. } if id == request_id)
        })
    }

    /// Text of the most recent assistant answer, if any
    pub fn last_answer(&self) -> Option<&str> {
        self.turns.iter().rev().find_map(|t| match t {
            Turn::AssistantText { text } => Some(text.as_str()),
            _ => None,
        })
    }

    /// Check the request/result correlation invariant.
    ///
    /// Every result must answer exactly one earlier request, request ids must
    /// be unique, and no request may still be open when a user or assistant
    /// text turn follows (or when the transcript ends).
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        let mut open: HashSet<&str> = HashSet::new();

        for (index, turn) in self.turns.iter().enumerate() {
            match turn {
                Turn::AssistantToolRequest { request_id, .. } => {
                    if !seen.insert(request_id.as_str()) {
                        return Err(Error::invalid_argument(format!(
                            "duplicate tool request id '{}'",
                            request_id
                        ))
                        .with_context("index", index.to_string()));
                    }
                    open.insert(request_id.as_str());
                }
                Turn::ToolResult { request_id, .. } => {
                    if !open.remove(request_id.as_str()) {
                        return Err(Error::invalid_argument(format!(
                            "tool result '{}' has no open request",
                            request_id
                        ))
                        .with_context("index", index.to_string()));
                    }
                }
                Turn::User { .. } | Turn::AssistantText { .. } => {
                    if !open.is_empty() {
                        return Err(Error::invalid_argument(format!(
                            "{} tool request(s) left unanswered",
                            open.len()
                        ))
                        .with_context("index", index.to_string()));
                    }
                }
            }
        }

        if !open.is_empty() {
            return Err(Error::invalid_argument(format!(
                "{} tool request(s) left unanswered at end of transcript",
                open.len()
            )));
        }
        Ok(())
    }

    /// Serialize to the persisted JSON document.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let doc = SnapshotRef {
            version: SNAPSHOT_VERSION,
            saved_at: chrono::Local::now().to_rfc3339(),
            turns: &self.turns,
        };
        serde_json::to_vec_pretty(&doc).map_err(|e| {
            error::serialization_error(format!("failed to serialize transcript: {}", e))
                .with_operation("transcript::snapshot")
        })
    }

    /// Parse a persisted document, rejecting anything malformed or
    /// violating the correlation invariant.
    pub fn restore(bytes: &[u8]) -> Result<Transcript> {
        let doc: SnapshotOwned = serde_json::from_slice(bytes).map_err(|e| {
            Error::corrupt_snapshot(format!("snapshot is not a valid transcript document: {}", e))
                .with_operation("transcript::restore")
                .set_source(e)
        })?;

        if doc.version != SNAPSHOT_VERSION {
            return Err(Error::corrupt_snapshot(format!(
                "unsupported snapshot version {}",
                doc.version
            ))
            .with_operation("transcript::restore"));
        }

        let transcript = Transcript { turns: doc.turns };
        transcript.validate().map_err(|e| {
            Error::corrupt_snapshot(e.message().to_string()).with_operation("transcript::restore")
        })?;
        Ok(transcript)
    }

    /// Like [`Transcript::restore`], but never fails: malformed input yields
    /// an empty transcript plus the diagnostic.
    pub fn restore_or_empty(bytes: &[u8]) -> (Transcript, Option<Error>) {
        match Self::restore(bytes) {
            Ok(t) => (t, None),
            Err(e) => {
                tracing::warn!(error = %e, "discarding corrupt transcript snapshot");
                (Transcript::new(), Some(e))
            }
        }
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a Turn;
    type IntoIter = std::slice::Iter<'a, Turn>;

    fn into_iter(self) -> Self::IntoIter {
        self.turns.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tokio_test::{assert_err, assert_ok};

    fn sample() -> Transcript {
        let mut t = Transcript::new();
        t.append(Turn::user("list files in /tmp"));
        t.commit_round(vec![
            Turn::tool_request("call_1", "execute_shell_command", r#"{"command":"ls /tmp"}"#),
            Turn::tool_request("call_2", "execute_shell_command", r#"{"command":"pwd"}"#),
            Turn::tool_result("call_2", "execute_shell_command", "/home\n", true),
            Turn::tool_result("call_1", "execute_shell_command", "a.txt\nb.txt\n", true),
        ]);
        t.append(Turn::assistant_text("There are two files."));
        t
    }

    #[test]
    fn test_snapshot_restore_roundtrip() {
        let t = sample();
        let bytes = t.snapshot().unwrap();
        let restored = Transcript::restore(&bytes).unwrap();
        assert_eq!(restored, t);
    }

    #[test]
    fn test_turn_serialization_shape() {
        let json = serde_json::to_value(Turn::tool_result("c1", "x", "out", false)).unwrap();
        assert_eq!(json["type"], "tool_result");
        assert_eq!(json["request_id"], "c1");
        assert_eq!(json["succeeded"], false);
    }

    #[test]
    fn test_restore_rejects_garbage() {
        let err = Transcript::restore(b"{ this is not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptSnapshot);

        let err = Transcript::restore(br#"{"version": 99, "turns": []}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptSnapshot);
    }

    #[test]
    fn test_restore_or_empty_falls_back() {
        let (t, diag) = Transcript::restore_or_empty(b"\x00\x01garbage");
        assert!(t.is_empty());
        assert_eq!(diag.unwrap().kind(), ErrorKind::CorruptSnapshot);

        let (t, diag) = Transcript::restore_or_empty(&sample().snapshot().unwrap());
        assert_eq!(t.len(), 6);
        assert!(diag.is_none());
    }

    #[test]
    fn test_restore_rejects_orphan_result() {
        let doc = serde_json::json!({
            "version": 1,
            "turns": [
                {"type": "user", "text": "hi"},
                {"type": "tool_result", "request_id": "ghost", "tool_name": "x", "output": "", "succeeded": true}
            ]
        });
        let err = Transcript::restore(doc.to_string().as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptSnapshot);
        assert!(err.message().contains("ghost"));
    }

    #[test]
    fn test_validate() {
        assert_ok!(sample().validate());

        let mut t = Transcript::new();
        t.append(Turn::tool_request("a", "x", "{}"));
        t.append(Turn::assistant_text("done"));
        assert_err!(t.validate());

        let mut t = Transcript::new();
        t.append(Turn::tool_request("a", "x", "{}"));
        t.append(Turn::tool_result("a", "x", "", true));
        t.append(Turn::tool_result("a", "x", "", true));
        assert_err!(t.validate());

        let mut t = Transcript::new();
        t.append(Turn::tool_request("a", "x", "{}"));
        assert_err!(t.validate());
    }

    #[test]
    fn test_clear_and_replace() {
        let mut t = sample();
        assert_eq!(t.last_answer(), Some("There are two files."));
        assert!(t.has_request_id("call_1"));

        t.clear();
        assert!(t.is_empty());

        t.replace(sample());
        assert_eq!(t.len(), 6);
        assert_eq!(t.turns()[0].kind(), "user");
    }
}
