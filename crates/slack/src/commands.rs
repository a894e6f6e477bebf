use thiserror::Error;

use mockops_core::domain::ticket::{TicketKey, TicketStatus};

pub const TICKET_COMMAND: &str = "/ticket";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlashCommandPayload {
    pub command: String,
    pub text: String,
    pub channel_id: String,
    pub user_id: String,
    pub trigger_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TicketCommand {
    Show { key: TicketKey },
    Export { key: TicketKey },
    List { status: Option<TicketStatus> },
    Help,
    Invalid { reason: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("unsupported slash command: {0}")]
    UnsupportedCommand(String),
}

pub fn parse_ticket_command(
    payload: &SlashCommandPayload,
) -> Result<TicketCommand, CommandParseError> {
    if payload.command != TICKET_COMMAND {
        return Err(CommandParseError::UnsupportedCommand(payload.command.clone()));
    }
    Ok(parse_command_text(&payload.text))
}

/// Keys are generated upper-case, so lookups are too.
fn ticket_key(raw: &str) -> TicketKey {
    TicketKey(raw.trim().to_ascii_uppercase())
}

/// Parses the text after `/ticket`. Unknown verbs fall back to help.
pub fn parse_command_text(input: &str) -> TicketCommand {
    let mut parts = input.split_whitespace();
    let Some(verb) = parts.next() else {
        return TicketCommand::Help;
    };

    match verb.to_ascii_lowercase().as_str() {
        "show" | "view" => match parts.next() {
            Some(key) => TicketCommand::Show { key: ticket_key(key) },
            None => TicketCommand::Invalid { reason: "`show` needs a ticket key".to_owned() },
        },
        "export" | "textract" => match parts.next() {
            Some(key) => TicketCommand::Export { key: ticket_key(key) },
            None => TicketCommand::Invalid { reason: "`export` needs a ticket key".to_owned() },
        },
        "list" | "ls" => match parts.next() {
            None | Some("all") => TicketCommand::List { status: None },
            Some(filter) => match filter.parse::<TicketStatus>() {
                Ok(status) => TicketCommand::List { status: Some(status) },
                Err(_) => TicketCommand::Invalid {
                    reason: format!("unknown status `{filter}` (use open, in_review or closed)"),
                },
            },
        },
        _ => TicketCommand::Help,
    }
}
