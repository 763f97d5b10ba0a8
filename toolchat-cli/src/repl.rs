//! Operator command parsing and transcript rendering for the REPL

use toolchat_core::Turn;

pub const HELP: &str = "\
Commands:
  /help            Show this help
  /model [name]    Switch to the next configured model, or to <name>
  /clear           Start a new conversation
  /save            Save the conversation to a new snapshot file
  /load <file>     Replace the conversation with a saved snapshot
  /list            List saved snapshots, newest first
  /retry           Resubmit the conversation after an error or interrupt
  /history         Show the conversation so far
  /usage           Show token usage for this run
  /quit            Save history and exit (also /exit, /q)

Anything else is sent to the model. Ctrl-C interrupts a running exchange.";

/// One line of operator input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Empty,
    Message(String),
    Help,
    Model(Option<String>),
    Clear,
    Save,
    Load(String),
    List,
    Retry,
    History,
    Usage,
    Quit,
    /// Not understood; carries the message to show
    Invalid(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Message(line.to_string());
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, Some(arg.trim()).filter(|a| !a.is_empty())),
            None => (rest, None),
        };

        match name {
            "help" | "?" => Command::Help,
            "model" => Command::Model(arg.map(str::to_string)),
            "clear" => Command::Clear,
            "save" => Command::Save,
            "load" => match arg {
                Some(path) => Command::Load(path.to_string()),
                None => Command::Invalid("Usage: /load <file>".to_string()),
            },
            "list" => Command::List,
            "retry" => Command::Retry,
            "history" => Command::History,
            "usage" => Command::Usage,
            "quit" | "exit" | "q" => Command::Quit,
            other => Command::Invalid(format!(
                "Unknown command: /{}. Type /help for commands.",
                other
            )),
        }
    }
}

/// Cut to `max_chars` characters, marking the cut
pub fn preview(s: &str, max_chars: usize) -> String {
    let mut chars = s.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}

pub fn render_turn(turn: &Turn) -> String {
    match turn {
        Turn::User { text } => format!("you: {}", text),
        Turn::AssistantText { text } => format!("assistant: {}", text),
        Turn::AssistantToolRequest {
            request_id,
            tool_name,
            arguments,
        } => format!("  -> {} [{}] {}", tool_name, request_id, preview(arguments, 120)),
        Turn::ToolResult {
            request_id,
            tool_name,
            output,
            succeeded,
        } => format!(
            "  <- {} [{}] {}: {}",
            tool_name,
            request_id,
            if *succeeded { "ok" } else { "failed" },
            preview(output.trim(), 200)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("   "), Command::Empty);
        assert_eq!(Command::parse("/help"), Command::Help);
        assert_eq!(Command::parse("/model"), Command::Model(None));
        assert_eq!(
            Command::parse("/model  gpt-4o-mini "),
            Command::Model(Some("gpt-4o-mini".into()))
        );
        assert_eq!(
            Command::parse("/load saved/conversation_1.json"),
            Command::Load("saved/conversation_1.json".into())
        );
        assert_eq!(Command::parse("/q"), Command::Quit);
        assert_eq!(Command::parse("/exit"), Command::Quit);
        assert_eq!(Command::parse("/retry"), Command::Retry);
        assert_eq!(Command::parse("/usage"), Command::Usage);
    }

    #[test]
    fn test_parse_messages_and_errors() {
        assert_eq!(
            Command::parse("  list files in /tmp "),
            Command::Message("list files in /tmp".into())
        );
        assert!(matches!(Command::parse("/load"), Command::Invalid(m) if m.contains("Usage")));
        assert!(matches!(Command::parse("/frobnicate"), Command::Invalid(m) if m.contains("/frobnicate")));
    }

    #[test]
    fn test_render_turns() {
        let line = render_turn(&Turn::tool_result("c1", "execute_shell_command", "a\n", false));
        assert_eq!(line, "  <- execute_shell_command [c1] failed: a");
        assert_eq!(render_turn(&Turn::user("hi")), "you: hi");
        assert_eq!(preview("héllo", 2), "hé…");
        assert_eq!(preview("hé", 2), "hé");
    }
}
