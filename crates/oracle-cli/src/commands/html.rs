//! /html command - print the conversation as HTML

use super::CommandResult;
use oracle_chat::Conversation;

pub struct HtmlCommand;

impl HtmlCommand {
    pub fn execute(conversation: &Conversation) -> CommandResult {
        if conversation.is_empty() {
            return CommandResult::Message("Nothing to render yet.".to_string());
        }
        CommandResult::Message(oracle_render::render_transcript(conversation.turns()))
    }
}
