//! Slash commands for interactive mode

mod html;
mod sources;

pub use html::HtmlCommand;
pub use sources::{SourceCommand, SourcesCommand, list_sources};

use oracle_chat::Conversation;
use oracle_render::Tooltip;

/// Result of executing a slash command
#[derive(Debug, PartialEq, Eq)]
pub enum CommandResult {
    /// Start a new conversation
    Clear,
    /// Show a message to the user (not sent to the oracle)
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse and execute a slash command
pub fn execute_command(
    input: &str,
    conversation: &Conversation,
    tooltip: &mut Tooltip,
) -> Option<CommandResult> {
    let input = input.trim();

    let rest = input.strip_prefix('/')?;
    let parts: Vec<&str> = rest.splitn(2, ' ').collect();
    let command = parts[0].to_lowercase();
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "new" | "clear" | "c" => CommandResult::Clear,

        "quit" | "exit" | "q" => CommandResult::Exit,

        "sources" | "s" => SourcesCommand::execute(conversation),

        "source" => SourceCommand::execute(args, conversation, tooltip),

        "html" => HtmlCommand::execute(conversation),

        _ => CommandResult::Unknown(command),
    })
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?        Show this help message
  /sources, /s         List the sources cited by the last answer
  /source <n>          Show or hide the excerpt behind citation [n]
  /html                Print the conversation as HTML
  /new, /clear, /c     Start a new conversation
  /quit, /exit, /q     Exit oracle

Press Ctrl-C while an answer is streaming to stop it."#
        .to_string()
}
