//! /sources and /source commands - list citations and show their excerpts

use super::CommandResult;
use oracle_chat::Conversation;
use oracle_render::Tooltip;
use oracle_wire::Source;

use crate::utils::truncate_chars;

pub struct SourcesCommand;

impl SourcesCommand {
    pub fn execute(conversation: &Conversation) -> CommandResult {
        let sources = conversation
            .iter()
            .rev()
            .find(|t| t.is_assistant())
            .map(|t| t.sources())
            .unwrap_or_default();

        if sources.is_empty() {
            return CommandResult::Message("No sources cited yet.".to_string());
        }
        CommandResult::Message(list_sources(sources))
    }
}

pub struct SourceCommand;

impl SourceCommand {
    pub fn execute(args: &str, conversation: &Conversation, tooltip: &mut Tooltip) -> CommandResult {
        let Ok(ordinal) = args.trim_matches(|c| c == '[' || c == ']').parse::<usize>() else {
            return CommandResult::Message("Usage: /source <n>".to_string());
        };

        let Some(source) = conversation.find_source(ordinal) else {
            return CommandResult::Message(format!("No source [{}] in this conversation", ordinal));
        };

        tooltip.toggle(source);
        if !tooltip.is_visible() {
            return CommandResult::Message(format!("[{}] hidden", ordinal));
        }

        let excerpt = if tooltip.text().is_empty() {
            "(no excerpt)"
        } else {
            tooltip.text()
        };
        CommandResult::Message(format!("{}\n\n{}", source_line(source), excerpt))
    }
}

/// One line per source: `[n] citation <url>`
pub fn list_sources(sources: &[Source]) -> String {
    sources
        .iter()
        .map(source_line)
        .collect::<Vec<_>>()
        .join("\n")
}

fn source_line(source: &Source) -> String {
    format!(
        "[{}] {} <{}>",
        source.ordinal,
        truncate_chars(&source.citation, 80),
        source.url
    )
}
